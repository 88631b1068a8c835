use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerResult {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "NOT_SAFE")]
    NotSafe,
    #[serde(rename = "NA")]
    NotApplicable,
}

impl AnswerResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerResult::Safe => "SAFE",
            AnswerResult::NotSafe => "NOT_SAFE",
            AnswerResult::NotApplicable => "NA",
        }
    }
}

impl fmt::Display for AnswerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(AnswerResult::Safe),
            "NOT_SAFE" => Ok(AnswerResult::NotSafe),
            "NA" => Ok(AnswerResult::NotApplicable),
            other => Err(format!("Unknown answer result: {other}")),
        }
    }
}
