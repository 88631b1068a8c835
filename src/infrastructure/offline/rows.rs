use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct OfflineInspectionRow {
    pub id: String,
    pub server_inspection_id: Option<i64>,
    pub line_item_ref: i64,
    pub inspector_ref: i64,
    pub status: String,
    pub payload: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub failure_kind: Option<String>,
    pub attempt_count: i64,
    pub last_attempt_at: Option<i64>,
    pub discard_requested: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub attachment_key: String,
    pub content_type: String,
    pub width: i64,
    pub height: i64,
    pub sha256: String,
    pub data: Vec<u8>,
}
