use crate::domain::entities::{OfflineInspectionRecord, SyncPassReport};
use crate::presentation::dto::Validate;
use serde::{Deserialize, Serialize};

/// CLI の `capture` に渡す入力ファイル。画像はファイルパスで指定する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureManifest {
    pub line_item: i64,
    pub inspector: i64,
    #[serde(default)]
    pub checklist_template: Option<String>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    pub answers: Vec<AnswerInput>,
    #[serde(default)]
    pub evidence_photos: Vec<PhotoInput>,
    #[serde(default)]
    pub inspector_signature: Option<String>,
    #[serde(default)]
    pub client_signature: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationInput {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_key: String,
    pub result: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub photos: Vec<PhotoInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoInput {
    pub slot_name: String,
    pub path: String,
    #[serde(default)]
    pub location: Option<LocationInput>,
}

impl Validate for CaptureManifest {
    fn validate(&self) -> Result<(), String> {
        if self.line_item <= 0 {
            return Err("line_item must be a positive id".to_string());
        }
        if self.inspector <= 0 {
            return Err("inspector must be a positive id".to_string());
        }
        if self.answers.is_empty() {
            return Err("At least one answer is required".to_string());
        }
        for answer in &self.answers {
            if answer.question_key.trim().is_empty() {
                return Err("question_key is required".to_string());
            }
            if answer.result.trim().is_empty() {
                return Err(format!("result is required for {}", answer.question_key));
            }
        }
        let photos = self
            .answers
            .iter()
            .flat_map(|a| a.photos.iter())
            .chain(self.evidence_photos.iter());
        for photo in photos {
            if photo.slot_name.trim().is_empty() {
                return Err("slot_name is required".to_string());
            }
            if photo.path.trim().is_empty() {
                return Err(format!("path is required for slot {}", photo.slot_name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfflineInspectionSummary {
    pub id: String,
    pub server_inspection_id: Option<i64>,
    pub line_item_ref: i64,
    pub inspector_ref: i64,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
    pub attempt_count: u32,
    pub answer_count: usize,
    pub photo_count: usize,
    pub discard_requested: bool,
}

impl From<&OfflineInspectionRecord> for OfflineInspectionSummary {
    fn from(record: &OfflineInspectionRecord) -> Self {
        Self {
            id: record.id().to_string(),
            server_inspection_id: record.server_inspection_id().map(|id| id.value()),
            line_item_ref: record.line_item_ref(),
            inspector_ref: record.inspector_ref(),
            status: record.status().as_str().to_string(),
            created_at: record.created_at().timestamp_millis(),
            updated_at: record.updated_at().timestamp_millis(),
            synced_at: record.synced_at().map(|at| at.timestamp_millis()),
            last_error: record.last_error().map(str::to_string),
            failure_kind: record.failure_kind().map(|kind| kind.as_str().to_string()),
            attempt_count: record.attempt_count(),
            answer_count: record.payload().answers.len(),
            photo_count: record.payload().photo_count(),
            discard_requested: record.discard_requested(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPassResponse {
    pub attempted: u32,
    pub synced: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending_after: u64,
    pub coalesced: bool,
    pub offline: bool,
    pub duration_ms: u64,
}

impl From<SyncPassReport> for SyncPassResponse {
    fn from(report: SyncPassReport) -> Self {
        Self {
            attempted: report.attempted,
            synced: report.synced,
            failed: report.failed,
            skipped: report.skipped,
            pending_after: report.pending_after,
            coalesced: report.coalesced,
            offline: report.offline,
            duration_ms: report.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingCountResponse {
    pub pending: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordActionResponse {
    pub id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub removed: u64,
}
