use serde::{Deserialize, Serialize};
use std::fmt;

/// サーバーが割り当てる正規の点検ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ServerInspectionId(i64);

impl ServerInspectionId {
    pub fn new(value: i64) -> Result<Self, String> {
        if value <= 0 {
            return Err(format!("Server inspection ID must be positive, got {value}"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ServerInspectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ServerInspectionId> for i64 {
    fn from(id: ServerInspectionId) -> Self {
        id.0
    }
}

impl TryFrom<i64> for ServerInspectionId {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
