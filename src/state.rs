use crate::application::ports::{AssetCompressor, ReconciliationClient, RecordStore};
use crate::application::services::{
    OfflineInspectionService, OfflineInspectionServiceTrait, SyncQueueManager,
};
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::media::JpegCompressor;
use crate::infrastructure::offline::{SqliteRecordStore, SyncScheduler, SyncSchedulerHandle};
use crate::infrastructure::reconciliation::HttpReconciliationClient;
use crate::presentation::handlers::OfflineInspectionHandler;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// アプリケーション全体の状態を管理する構造体
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: ConnectionPool,
    pub sync_queue: Arc<SyncQueueManager>,
    pub offline_inspection_service: Arc<dyn OfflineInspectionServiceTrait>,
    pub offline_inspection_handler: Arc<OfflineInspectionHandler>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;

        if let Some(path) = sqlite_file_path(&config.database.url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db_pool =
            ConnectionPool::new(&config.database.url, config.database.max_connections).await?;
        db_pool.migrate().await?;

        let client: Arc<dyn ReconciliationClient> =
            Arc::new(HttpReconciliationClient::new(&config.remote)?);
        Self::with_client(config, db_pool, client).await
    }

    /// 送信先を差し替えて組み立てる。`db_pool` はマイグレーション済みであること。
    pub async fn with_client(
        config: AppConfig,
        db_pool: ConnectionPool,
        client: Arc<dyn ReconciliationClient>,
    ) -> Result<Self, AppError> {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db_pool.clone()));
        let compressor: Arc<dyn AssetCompressor> =
            Arc::new(JpegCompressor::new(config.compression.jpeg_quality));

        let sync_queue = Arc::new(SyncQueueManager::new(
            Arc::clone(&store),
            client,
            config.sync.submit_timeout(),
        ));

        // 前回の実行が送信中に終了していた場合の後始末
        let recovered = sync_queue.recover_interrupted().await?;
        let pending = sync_queue.refresh_pending_count().await?;
        tracing::info!(
            target: "offline::store",
            recovered,
            pending,
            "offline inspection store ready"
        );

        let offline_inspection_service: Arc<dyn OfflineInspectionServiceTrait> =
            Arc::new(OfflineInspectionService::new(
                store,
                Arc::clone(&sync_queue),
                compressor,
                config.compression.max_dimension,
            ));
        let offline_inspection_handler = Arc::new(OfflineInspectionHandler::new(Arc::clone(
            &offline_inspection_service,
        )));

        Ok(Self {
            config,
            db_pool,
            sync_queue,
            offline_inspection_service,
            offline_inspection_handler,
        })
    }

    /// 自動同期が無効な場合は `None`。
    pub fn start_scheduler(&self) -> Option<SyncSchedulerHandle> {
        if !self.config.sync.auto_sync {
            return None;
        }
        Some(SyncScheduler::spawn(
            Arc::clone(&self.sync_queue),
            Duration::from_secs(self.config.sync.sync_interval),
        ))
    }

    pub async fn shutdown(&self) {
        self.db_pool.close().await;
    }
}

fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}
