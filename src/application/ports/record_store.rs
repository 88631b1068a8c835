use crate::domain::entities::OfflineInspectionRecord;
use crate::domain::value_objects::{OfflineInspectionId, RecordStatus};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// オフライン点検レコードの永続化ポート。
///
/// 書き込みはレコード本体と添付をまとめて1トランザクションで行い、
/// 途中で失敗した場合は直前にコミットされた状態が残る。
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// IDで upsert する。`SYNCED` の行への上書きは `AppError::InvalidTransition`。
    /// 保存済みの破棄予約は解除されない。
    async fn put(&self, record: &OfflineInspectionRecord) -> Result<(), AppError>;
    async fn get(
        &self,
        id: &OfflineInspectionId,
    ) -> Result<Option<OfflineInspectionRecord>, AppError>;
    /// 表示用。作成日時の新しい順。
    async fn list(&self) -> Result<Vec<OfflineInspectionRecord>, AppError>;
    /// 処理用。`SYNCED` 以外を作成日時の古い順。
    async fn list_unsynced(&self) -> Result<Vec<OfflineInspectionRecord>, AppError>;
    async fn list_by_status(
        &self,
        status: RecordStatus,
    ) -> Result<Vec<OfflineInspectionRecord>, AppError>;
    /// `PENDING` と `FAILED` の件数。
    async fn count_unsynced(&self) -> Result<u64, AppError>;
    /// 破棄予約だけを立てる。状態などほかの列は変更しない。
    /// `SYNCED` の行と存在しない行は false。
    async fn mark_discard_requested(
        &self,
        id: &OfflineInspectionId,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    /// 削除できた場合は true。
    async fn remove(&self, id: &OfflineInspectionId) -> Result<bool, AppError>;
    async fn remove_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}
