use crate::application::ports::{AssetCompressor, RecordStore};
use crate::application::services::capture_session::CaptureSession;
use crate::application::services::sync_queue::{AttemptResult, DiscardOutcome, SyncQueueManager};
use crate::domain::entities::{
    CapturedInspection, InspectionPayload, OfflineInspectionRecord, StatusChange, SyncPassReport,
};
use crate::domain::value_objects::OfflineInspectionId;
use crate::infrastructure::offline::metrics::{SyncMetricsSnapshot, SyncTrigger};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// 画面側から利用するオフライン点検の操作。
#[async_trait]
pub trait OfflineInspectionServiceTrait: Send + Sync {
    fn begin_capture(
        &self,
        line_item_ref: i64,
        inspector_ref: i64,
    ) -> Result<CaptureSession, AppError>;
    async fn save(&self, captured: CapturedInspection)
    -> Result<OfflineInspectionRecord, AppError>;
    async fn list(&self) -> Result<Vec<OfflineInspectionRecord>, AppError>;
    async fn get(
        &self,
        id: &OfflineInspectionId,
    ) -> Result<Option<OfflineInspectionRecord>, AppError>;
    fn pending_count(&self) -> u64;
    fn subscribe_pending(&self) -> watch::Receiver<u64>;
    fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusChange>;
    async fn run_sync_pass(&self) -> Result<SyncPassReport, AppError>;
    async fn retry(&self, id: &OfflineInspectionId) -> Result<AttemptResult, AppError>;
    async fn discard(&self, id: &OfflineInspectionId) -> Result<DiscardOutcome, AppError>;
    async fn amend(
        &self,
        id: &OfflineInspectionId,
        payload: InspectionPayload,
    ) -> Result<OfflineInspectionRecord, AppError>;
    /// `older_than` より前に同期済みになったレコードを削除する。
    async fn purge_synced(&self, older_than: Duration) -> Result<u64, AppError>;
    fn metrics(&self) -> SyncMetricsSnapshot;
}

pub struct OfflineInspectionService {
    store: Arc<dyn RecordStore>,
    queue: Arc<SyncQueueManager>,
    compressor: Arc<dyn AssetCompressor>,
    max_dimension: u32,
}

impl OfflineInspectionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<SyncQueueManager>,
        compressor: Arc<dyn AssetCompressor>,
        max_dimension: u32,
    ) -> Self {
        Self {
            store,
            queue,
            compressor,
            max_dimension,
        }
    }

    pub fn queue(&self) -> Arc<SyncQueueManager> {
        Arc::clone(&self.queue)
    }
}

#[async_trait]
impl OfflineInspectionServiceTrait for OfflineInspectionService {
    fn begin_capture(
        &self,
        line_item_ref: i64,
        inspector_ref: i64,
    ) -> Result<CaptureSession, AppError> {
        CaptureSession::begin(
            line_item_ref,
            inspector_ref,
            Arc::clone(&self.compressor),
            self.max_dimension,
        )
    }

    async fn save(
        &self,
        captured: CapturedInspection,
    ) -> Result<OfflineInspectionRecord, AppError> {
        if captured.payload.answers.is_empty() {
            return Err(AppError::ValidationError(
                "an inspection needs at least one answer".to_string(),
            ));
        }
        captured
            .payload
            .validate()
            .map_err(AppError::ValidationError)?;

        // 同じIDの二重保存は既存レコードを返す。
        if let Some(existing) = self.store.get(&captured.id).await? {
            tracing::debug!(
                target: "offline::store",
                id = %existing.id(),
                status = %existing.status(),
                "inspection already saved"
            );
            return Ok(existing);
        }

        let record = OfflineInspectionRecord::from_capture(captured);
        self.queue.enqueue(&record).await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<OfflineInspectionRecord>, AppError> {
        self.store.list().await
    }

    async fn get(
        &self,
        id: &OfflineInspectionId,
    ) -> Result<Option<OfflineInspectionRecord>, AppError> {
        self.store.get(id).await
    }

    fn pending_count(&self) -> u64 {
        self.queue.pending_count()
    }

    fn subscribe_pending(&self) -> watch::Receiver<u64> {
        self.queue.subscribe_pending()
    }

    fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.queue.subscribe_status_changes()
    }

    async fn run_sync_pass(&self) -> Result<SyncPassReport, AppError> {
        self.queue.run_sync_pass(SyncTrigger::Manual).await
    }

    async fn retry(&self, id: &OfflineInspectionId) -> Result<AttemptResult, AppError> {
        self.queue.retry(id).await
    }

    async fn discard(&self, id: &OfflineInspectionId) -> Result<DiscardOutcome, AppError> {
        self.queue.discard(id).await
    }

    async fn amend(
        &self,
        id: &OfflineInspectionId,
        payload: InspectionPayload,
    ) -> Result<OfflineInspectionRecord, AppError> {
        self.queue.amend(id, payload).await
    }

    async fn purge_synced(&self, older_than: Duration) -> Result<u64, AppError> {
        if older_than < Duration::zero() {
            return Err(AppError::InvalidInput(
                "purge window must not be negative".to_string(),
            ));
        }
        self.queue.purge_synced_before(Utc::now() - older_than).await
    }

    fn metrics(&self) -> SyncMetricsSnapshot {
        self.queue.metrics()
    }
}
