use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// 直近の送信試行が `FAILED` になった理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// ネットワークエラーまたは 5xx。
    Transient,
    /// 送信がタイムアウトした。
    Timeout,
    /// サーバー側で恒久的に拒否された。ユーザーの修正が必要。
    Rejected,
    /// 試行中でないのに `UPLOADING` のまま残っていた（クラッシュ等）。
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "TRANSIENT",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Rejected => "REJECTED",
            FailureKind::Interrupted => "INTERRUPTED",
        }
    }

    pub fn is_auto_retryable(&self) -> bool {
        !matches!(self, FailureKind::Rejected)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSIENT" => Ok(FailureKind::Transient),
            "TIMEOUT" => Ok(FailureKind::Timeout),
            "REJECTED" => Ok(FailureKind::Rejected),
            "INTERRUPTED" => Ok(FailureKind::Interrupted),
            other => Err(format!("Unknown failure kind: {other}")),
        }
    }
}
