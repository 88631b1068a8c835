use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// オフライン点検レコードの同期状態。
///
/// ```text
/// PENDING -> UPLOADING -> SYNCED
///                      -> FAILED -> UPLOADING -> ...
/// ```
///
/// `PENDING` は初期状態のみ、`SYNCED` は終端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Uploading,
    Synced,
    Failed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 4] = [
        RecordStatus::Pending,
        RecordStatus::Uploading,
        RecordStatus::Synced,
        RecordStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Uploading => "UPLOADING",
            RecordStatus::Synced => "SYNCED",
            RecordStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Synced)
    }

    /// 「未同期 N 件」の表示対象。
    pub fn counts_as_pending(&self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, RecordStatus::Uploading)
                | (RecordStatus::Failed, RecordStatus::Uploading)
                | (RecordStatus::Uploading, RecordStatus::Synced)
                | (RecordStatus::Uploading, RecordStatus::Failed)
        )
    }

    pub fn ensure_transition(&self, next: RecordStatus) -> Result<(), String> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(format!("{} -> {} is not allowed", self, next))
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RecordStatus::Pending),
            "UPLOADING" => Ok(RecordStatus::Uploading),
            "SYNCED" => Ok(RecordStatus::Synced),
            "FAILED" => Ok(RecordStatus::Failed),
            other => Err(format!("Unknown record status: {other}")),
        }
    }
}
