pub const SELECT_STATUS_AND_DIGEST: &str = r#"
    SELECT status, payload_digest FROM offline_inspections WHERE id = ?1
"#;

pub const UPSERT_INSPECTION: &str = r#"
    INSERT INTO offline_inspections (
        id, server_inspection_id, line_item_ref, inspector_ref, status, payload,
        payload_digest, created_at, updated_at, synced_at, last_error, failure_kind,
        attempt_count, last_attempt_at, discard_requested
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
    ON CONFLICT(id) DO UPDATE SET
        server_inspection_id = excluded.server_inspection_id,
        line_item_ref = excluded.line_item_ref,
        inspector_ref = excluded.inspector_ref,
        status = excluded.status,
        payload = excluded.payload,
        payload_digest = excluded.payload_digest,
        updated_at = excluded.updated_at,
        synced_at = excluded.synced_at,
        last_error = excluded.last_error,
        failure_kind = excluded.failure_kind,
        attempt_count = excluded.attempt_count,
        last_attempt_at = excluded.last_attempt_at,
        discard_requested = MAX(offline_inspections.discard_requested, excluded.discard_requested)
"#;

pub const MARK_DISCARD_REQUESTED: &str = r#"
    UPDATE offline_inspections SET discard_requested = 1, updated_at = ?2
    WHERE id = ?1 AND status != 'SYNCED'
"#;

pub const DELETE_ATTACHMENTS: &str = r#"
    DELETE FROM offline_inspection_attachments WHERE record_id = ?1
"#;

pub const INSERT_ATTACHMENT: &str = r#"
    INSERT INTO offline_inspection_attachments (
        record_id, attachment_key, content_type, width, height, sha256, data
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

pub const SELECT_ATTACHMENTS: &str = r#"
    SELECT attachment_key, content_type, width, height, sha256, data
    FROM offline_inspection_attachments
    WHERE record_id = ?1
"#;

const INSPECTION_COLUMNS: &str = "id, server_inspection_id, line_item_ref, inspector_ref, status, \
    payload, created_at, updated_at, synced_at, last_error, failure_kind, attempt_count, \
    last_attempt_at, discard_requested";

pub fn select_inspection_by_id() -> String {
    format!("SELECT {INSPECTION_COLUMNS} FROM offline_inspections WHERE id = ?1")
}

pub fn select_all_inspections() -> String {
    format!(
        "SELECT {INSPECTION_COLUMNS} FROM offline_inspections \
         ORDER BY created_at DESC, id DESC"
    )
}

pub fn select_unsynced_inspections() -> String {
    format!(
        "SELECT {INSPECTION_COLUMNS} FROM offline_inspections \
         WHERE status != 'SYNCED' ORDER BY created_at ASC, id ASC"
    )
}

pub fn select_inspections_by_status() -> String {
    format!(
        "SELECT {INSPECTION_COLUMNS} FROM offline_inspections \
         WHERE status = ?1 ORDER BY created_at DESC, id DESC"
    )
}

pub const COUNT_UNSYNCED: &str = r#"
    SELECT COUNT(*) AS count FROM offline_inspections WHERE status IN ('PENDING', 'FAILED')
"#;

pub const DELETE_INSPECTION: &str = r#"
    DELETE FROM offline_inspections WHERE id = ?1
"#;

pub const DELETE_SYNCED_ATTACHMENTS_BEFORE: &str = r#"
    DELETE FROM offline_inspection_attachments
    WHERE record_id IN (
        SELECT id FROM offline_inspections WHERE status = 'SYNCED' AND synced_at < ?1
    )
"#;

pub const DELETE_SYNCED_BEFORE: &str = r#"
    DELETE FROM offline_inspections WHERE status = 'SYNCED' AND synced_at < ?1
"#;
