use super::captured_inspection::CapturedInspection;
use super::payload::InspectionPayload;
use crate::domain::value_objects::{
    FailureKind, OfflineInspectionId, RecordStatus, ServerInspectionId,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INTERRUPTED_REASON: &str = "interrupted";
pub const TIMEOUT_REASON: &str = "timeout";

/// ミリ秒精度に丸めた現在時刻。保存後に読み戻しても一致する。
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}

/// 永続化層から復元する際の生データ。
#[derive(Debug, Clone)]
pub struct OfflineInspectionParts {
    pub id: OfflineInspectionId,
    pub server_inspection_id: Option<ServerInspectionId>,
    pub line_item_ref: i64,
    pub inspector_ref: i64,
    pub status: RecordStatus,
    pub payload: InspectionPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub discard_requested: bool,
}

/// 端末に保存されたオフライン点検レコード。
///
/// 状態遷移は `begin_upload` / `mark_synced` / `mark_failed` 経由でのみ行う。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineInspectionRecord {
    id: OfflineInspectionId,
    server_inspection_id: Option<ServerInspectionId>,
    line_item_ref: i64,
    inspector_ref: i64,
    status: RecordStatus,
    payload: InspectionPayload,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    failure_kind: Option<FailureKind>,
    attempt_count: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    discard_requested: bool,
}

impl OfflineInspectionRecord {
    pub fn from_capture(captured: CapturedInspection) -> Self {
        let created_at = truncate_to_millis(captured.captured_at);
        Self {
            id: captured.id,
            server_inspection_id: None,
            line_item_ref: captured.line_item_ref,
            inspector_ref: captured.inspector_ref,
            status: RecordStatus::Pending,
            payload: captured.payload,
            created_at,
            updated_at: created_at,
            synced_at: None,
            last_error: None,
            failure_kind: None,
            attempt_count: 0,
            last_attempt_at: None,
            discard_requested: false,
        }
    }

    pub fn from_parts(parts: OfflineInspectionParts) -> Self {
        Self {
            id: parts.id,
            server_inspection_id: parts.server_inspection_id,
            line_item_ref: parts.line_item_ref,
            inspector_ref: parts.inspector_ref,
            status: parts.status,
            payload: parts.payload,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            synced_at: parts.synced_at,
            last_error: parts.last_error,
            failure_kind: parts.failure_kind,
            attempt_count: parts.attempt_count,
            last_attempt_at: parts.last_attempt_at,
            discard_requested: parts.discard_requested,
        }
    }

    pub fn id(&self) -> &OfflineInspectionId {
        &self.id
    }

    pub fn server_inspection_id(&self) -> Option<ServerInspectionId> {
        self.server_inspection_id
    }

    pub fn line_item_ref(&self) -> i64 {
        self.line_item_ref
    }

    pub fn inspector_ref(&self) -> i64 {
        self.inspector_ref
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn payload(&self) -> &InspectionPayload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn discard_requested(&self) -> bool {
        self.discard_requested
    }

    /// 自動同期の対象か。拒否されたまま未修正のものと破棄予約済みのものは除外する。
    pub fn is_auto_sync_candidate(&self) -> bool {
        if self.discard_requested {
            return false;
        }
        match self.status {
            RecordStatus::Pending => true,
            RecordStatus::Failed => self
                .failure_kind
                .map(|kind| kind.is_auto_retryable())
                .unwrap_or(true),
            RecordStatus::Uploading | RecordStatus::Synced => false,
        }
    }

    pub fn begin_upload(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(RecordStatus::Uploading)?;
        self.last_error = None;
        self.failure_kind = None;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// ステータス・サーバーID・同期時刻を一度に更新する。
    pub fn mark_synced(
        &mut self,
        server_id: ServerInspectionId,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transition(RecordStatus::Synced)?;
        self.server_inspection_id = Some(server_id);
        self.synced_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        kind: FailureKind,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transition(RecordStatus::Failed)?;
        self.last_error = Some(reason.into());
        self.failure_kind = Some(kind);
        self.updated_at = now;
        Ok(())
    }

    /// 試行中でない `UPLOADING` を中断扱いの `FAILED` に戻す。
    pub fn mark_interrupted(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.mark_failed(FailureKind::Interrupted, INTERRUPTED_REASON, now)
    }

    /// ユーザーによる修正。拒否フラグを解除して自動同期の対象に戻す。
    pub fn amend_payload(
        &mut self,
        payload: InspectionPayload,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if !matches!(self.status, RecordStatus::Pending | RecordStatus::Failed) {
            return Err(AppError::InvalidTransition(format!(
                "cannot amend a {} record",
                self.status
            )));
        }
        payload.validate().map_err(AppError::ValidationError)?;
        self.payload = payload;
        self.failure_kind = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn request_discard(&mut self, now: DateTime<Utc>) {
        self.discard_requested = true;
        self.updated_at = now;
    }

    fn transition(&mut self, next: RecordStatus) -> Result<(), AppError> {
        self.status
            .ensure_transition(next)
            .map_err(AppError::InvalidTransition)?;
        self.status = next;
        Ok(())
    }
}
