use crate::domain::value_objects::{OfflineInspectionId, RecordStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 同期パス1回分の結果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPassReport {
    pub attempted: u32,
    pub synced: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending_after: u64,
    /// 別のパスが実行中だったため何もしなかった。
    pub coalesced: bool,
    /// サーバーに到達できず、どのレコードも変更しなかった。
    pub offline: bool,
    pub duration_ms: u64,
}

impl SyncPassReport {
    pub fn coalesced(pending_after: u64) -> Self {
        Self {
            coalesced: true,
            pending_after,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: OfflineInspectionId,
    pub status: RecordStatus,
    pub at: DateTime<Utc>,
}
