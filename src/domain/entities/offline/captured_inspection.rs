use super::payload::InspectionPayload;
use crate::domain::value_objects::OfflineInspectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 撮影・入力が完了し、保存待ちの点検。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedInspection {
    pub id: OfflineInspectionId,
    pub line_item_ref: i64,
    pub inspector_ref: i64,
    pub payload: InspectionPayload,
    pub captured_at: DateTime<Utc>,
}
