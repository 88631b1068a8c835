use super::mappers::{assemble_payload, attachment_from_row, record_from_row, split_payload};
use super::queries::{
    COUNT_UNSYNCED, DELETE_ATTACHMENTS, DELETE_INSPECTION, DELETE_SYNCED_ATTACHMENTS_BEFORE,
    DELETE_SYNCED_BEFORE, INSERT_ATTACHMENT, MARK_DISCARD_REQUESTED, SELECT_ATTACHMENTS, SELECT_STATUS_AND_DIGEST,
    UPSERT_INSPECTION, select_all_inspections, select_inspection_by_id,
    select_inspections_by_status, select_unsynced_inspections,
};
use super::rows::{AttachmentRow, OfflineInspectionRow};
use crate::application::ports::RecordStore;
use crate::domain::entities::{EncodedImage, OfflineInspectionRecord};
use crate::domain::value_objects::{OfflineInspectionId, RecordStatus};
use crate::infrastructure::database::ConnectionPool;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};
use std::collections::HashMap;

/// SQLite 上のオフライン点検ストア。
///
/// レコード行と添付行は同じトランザクションで書き込む。
pub struct SqliteRecordStore {
    pool: ConnectionPool,
}

impl SqliteRecordStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    async fn load_rows(
        &self,
        sql: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<OfflineInspectionRecord>, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;
        let mut query = sqlx::query_as::<_, OfflineInspectionRow>(sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&mut *tx).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(hydrate(&mut tx, row).await?);
        }
        tx.commit().await?;
        Ok(records)
    }
}

async fn hydrate(
    conn: &mut SqliteConnection,
    row: OfflineInspectionRow,
) -> Result<OfflineInspectionRecord, AppError> {
    let attachment_rows = sqlx::query_as::<_, AttachmentRow>(SELECT_ATTACHMENTS)
        .bind(&row.id)
        .fetch_all(&mut *conn)
        .await?;

    let mut attachments = HashMap::with_capacity(attachment_rows.len());
    for attachment in attachment_rows {
        let (key, image) = attachment_from_row(attachment)?;
        attachments.insert(key, image);
    }

    let payload = assemble_payload(&row.payload, attachments).map_err(|err| match err {
        AppError::Storage(msg) => AppError::Storage(format!("record {}: {msg}", row.id)),
        other => other,
    })?;
    record_from_row(row, payload)
}

async fn rewrite_attachments(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: &str,
    attachments: &[(String, &EncodedImage)],
) -> Result<(), AppError> {
    sqlx::query(DELETE_ATTACHMENTS)
        .bind(record_id)
        .execute(&mut **tx)
        .await?;

    for (key, image) in attachments {
        sqlx::query(INSERT_ATTACHMENT)
            .bind(record_id)
            .bind(key)
            .bind(&image.content_type)
            .bind(i64::from(image.width))
            .bind(i64::from(image.height))
            .bind(&image.sha256)
            .bind(image.bytes.as_slice())
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, record: &OfflineInspectionRecord) -> Result<(), AppError> {
        let parts = split_payload(record.payload())?;
        let id = record.id().as_str();

        let mut tx = self.pool.get_pool().begin().await?;

        let existing = sqlx::query(SELECT_STATUS_AND_DIGEST)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let previous_digest = match existing {
            Some(row) => {
                let status: String = row.try_get("status")?;
                if status == RecordStatus::Synced.as_str() {
                    return Err(AppError::InvalidTransition(format!(
                        "record {id} is already SYNCED"
                    )));
                }
                Some(row.try_get::<String, _>("payload_digest")?)
            }
            None => None,
        };

        sqlx::query(UPSERT_INSPECTION)
            .bind(id)
            .bind(record.server_inspection_id().map(|sid| sid.value()))
            .bind(record.line_item_ref())
            .bind(record.inspector_ref())
            .bind(record.status().as_str())
            .bind(&parts.manifest)
            .bind(&parts.digest)
            .bind(record.created_at().timestamp_millis())
            .bind(record.updated_at().timestamp_millis())
            .bind(record.synced_at().map(|at| at.timestamp_millis()))
            .bind(record.last_error())
            .bind(record.failure_kind().map(|kind| kind.as_str()))
            .bind(i64::from(record.attempt_count()))
            .bind(record.last_attempt_at().map(|at| at.timestamp_millis()))
            .bind(record.discard_requested())
            .execute(&mut *tx)
            .await?;

        let attachments_changed = previous_digest.as_deref() != Some(parts.digest.as_str());
        if attachments_changed {
            rewrite_attachments(&mut tx, id, &parts.attachments).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            target: "offline::store",
            id,
            status = %record.status(),
            attachments = parts.attachments.len(),
            attachments_rewritten = attachments_changed,
            "offline inspection stored"
        );
        Ok(())
    }

    async fn get(
        &self,
        id: &OfflineInspectionId,
    ) -> Result<Option<OfflineInspectionRecord>, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;
        let row = sqlx::query_as::<_, OfflineInspectionRow>(&select_inspection_by_id())
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let record = match row {
            Some(row) => Some(hydrate(&mut tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<OfflineInspectionRecord>, AppError> {
        self.load_rows(&select_all_inspections(), None).await
    }

    async fn list_unsynced(&self) -> Result<Vec<OfflineInspectionRecord>, AppError> {
        self.load_rows(&select_unsynced_inspections(), None).await
    }

    async fn list_by_status(
        &self,
        status: RecordStatus,
    ) -> Result<Vec<OfflineInspectionRecord>, AppError> {
        self.load_rows(&select_inspections_by_status(), Some(status))
            .await
    }

    async fn count_unsynced(&self) -> Result<u64, AppError> {
        let count: i64 = sqlx::query(COUNT_UNSYNCED)
            .fetch_one(self.pool.get_pool())
            .await?
            .try_get("count")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn mark_discard_requested(
        &self,
        id: &OfflineInspectionId,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(MARK_DISCARD_REQUESTED)
            .bind(id.as_str())
            .bind(at.timestamp_millis())
            .execute(self.pool.get_pool())
            .await?;
        let marked = result.rows_affected() > 0;
        if marked {
            tracing::debug!(target: "offline::store", id = %id, "discard marker stored");
        }
        Ok(marked)
    }

    async fn remove(&self, id: &OfflineInspectionId) -> Result<bool, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;
        sqlx::query(DELETE_ATTACHMENTS)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(DELETE_INSPECTION)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::debug!(target: "offline::store", id = %id, "offline inspection removed");
        }
        Ok(removed)
    }

    async fn remove_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut tx = self.pool.get_pool().begin().await?;
        sqlx::query(DELETE_SYNCED_ATTACHMENTS_BEFORE)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(DELETE_SYNCED_BEFORE)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
