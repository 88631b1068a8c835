use crate::application::ports::{ReconciliationClient, RecordStore, SubmitOutcome};
use crate::domain::entities::{
    InspectionPayload, OfflineInspectionRecord, StatusChange, SyncPassReport, TIMEOUT_REASON,
    now_millis,
};
use crate::domain::value_objects::{FailureKind, OfflineInspectionId, RecordStatus};
use crate::infrastructure::offline::metrics::{
    AttemptMetadata, AttemptOutcomeStatus, SyncMetrics, SyncMetricsSnapshot, SyncTrigger,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// 1レコード分の送信試行の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Synced,
    Failed(FailureKind),
    /// 試行中・破棄予約済み・対象外のため送信しなかった。
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardOutcome {
    Removed,
    /// 送信中のため、結果が確定した時点で削除する。
    Deferred,
    NotFound,
}

#[derive(Default)]
struct InFlightState {
    active: HashSet<String>,
    discard_on_release: HashSet<String>,
}

/// レコード単位の排他。drop 時に解放される。
struct InFlightClaim {
    state: Arc<Mutex<InFlightState>>,
    id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        lock_state(&self.state).active.remove(&self.id);
    }
}

fn lock_state(state: &Mutex<InFlightState>) -> MutexGuard<'_, InFlightState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// オフライン点検の同期キュー。
///
/// - 同期パスは同時に1つだけ実行し、重複した呼び出しは合流させる。
/// - 同じレコードへの送信試行は常に1つまで。
/// - 送信中の破棄は結果確定後に実行する。
pub struct SyncQueueManager {
    store: Arc<dyn RecordStore>,
    client: Arc<dyn ReconciliationClient>,
    submit_timeout: Duration,
    pass_gate: tokio::sync::Mutex<()>,
    finalize_gate: tokio::sync::Mutex<()>,
    in_flight: Arc<Mutex<InFlightState>>,
    pending_tx: watch::Sender<u64>,
    status_tx: broadcast::Sender<StatusChange>,
    metrics: SyncMetrics,
}

impl SyncQueueManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        client: Arc<dyn ReconciliationClient>,
        submit_timeout: Duration,
    ) -> Self {
        let (pending_tx, _) = watch::channel(0);
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            store,
            client,
            submit_timeout,
            pass_gate: tokio::sync::Mutex::new(()),
            finalize_gate: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(Mutex::new(InFlightState::default())),
            pending_tx,
            status_tx,
            metrics: SyncMetrics::new(),
        }
    }

    /// 未同期件数。ストアを読まずに直近の値を返す。
    pub fn pending_count(&self) -> u64 {
        *self.pending_tx.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<u64> {
        self.pending_tx.subscribe()
    }

    pub fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_in_flight(&self, id: &OfflineInspectionId) -> bool {
        lock_state(&self.in_flight).active.contains(id.as_str())
    }

    /// ストアから未同期件数を数え直して通知する。
    pub async fn refresh_pending_count(&self) -> Result<u64, AppError> {
        let count = self.store.count_unsynced().await?;
        self.pending_tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
        Ok(count)
    }

    /// 新規レコードを `PENDING` として登録する。
    pub async fn enqueue(&self, record: &OfflineInspectionRecord) -> Result<(), AppError> {
        if record.status() != RecordStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "only PENDING records can be enqueued, got {}",
                record.status()
            )));
        }
        self.store.put(record).await?;
        self.publish(record);
        self.refresh_after_mutation().await;
        tracing::info!(
            target: "offline::sync",
            id = %record.id(),
            pending = self.pending_count(),
            "inspection queued for sync"
        );
        Ok(())
    }

    pub async fn run_sync_pass(&self, trigger: SyncTrigger) -> Result<SyncPassReport, AppError> {
        let Ok(_pass) = self.pass_gate.try_lock() else {
            let report = SyncPassReport::coalesced(self.pending_count());
            self.metrics.record_pass(&report, trigger);
            tracing::debug!(
                target: "offline::sync",
                trigger = %trigger,
                "sync pass already running; coalesced"
            );
            return Ok(report);
        };

        let started = Instant::now();
        let mut report = SyncPassReport::default();

        self.recover_interrupted().await?;

        if !self.client.is_reachable().await {
            report.offline = true;
            report.pending_after = self.refresh_pending_count().await?;
            report.duration_ms = elapsed_ms(started);
            self.metrics.record_pass(&report, trigger);
            tracing::info!(
                target: "offline::sync",
                trigger = %trigger,
                pending = report.pending_after,
                "remote unreachable; sync pass skipped"
            );
            return Ok(report);
        }

        for record in self.store.list_unsynced().await? {
            if !record.is_auto_sync_candidate() {
                report.skipped += 1;
                continue;
            }

            match self.attempt(record.id(), trigger, false).await {
                Ok(AttemptResult::Synced) => {
                    report.attempted += 1;
                    report.synced += 1;
                }
                Ok(AttemptResult::Failed(_)) => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Ok(AttemptResult::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.attempted += 1;
                    report.failed += 1;
                    tracing::warn!(
                        target: "offline::sync",
                        id = %record.id(),
                        error = %err,
                        "sync attempt aborted"
                    );
                }
            }
        }

        report.pending_after = self.refresh_pending_count().await?;
        report.duration_ms = elapsed_ms(started);
        self.metrics.record_pass(&report, trigger);

        tracing::info!(
            target: "offline::sync",
            trigger = %trigger,
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            pending = report.pending_after,
            duration_ms = report.duration_ms,
            "sync pass completed"
        );

        Ok(report)
    }

    /// 1件だけ手動で再送する。拒否済みのレコードも対象にする。
    pub async fn retry(&self, id: &OfflineInspectionId) -> Result<AttemptResult, AppError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("offline inspection {id}")))?;
        if record.status() == RecordStatus::Synced {
            return Err(AppError::InvalidTransition(format!(
                "offline inspection {id} is already SYNCED"
            )));
        }

        let result = self.attempt(id, SyncTrigger::Retry, true).await?;
        self.refresh_after_mutation().await;
        Ok(result)
    }

    pub async fn discard(&self, id: &OfflineInspectionId) -> Result<DiscardOutcome, AppError> {
        let finalize = self.finalize_gate.lock().await;

        let Some(claim) = self.try_claim(id) else {
            lock_state(&self.in_flight)
                .discard_on_release
                .insert(id.to_string());

            // マーカーは起動時の回復処理でも参照する。状態列には触れない。
            if let Err(err) = self.store.mark_discard_requested(id, now_millis()).await {
                tracing::warn!(
                    target: "offline::sync",
                    id = %id,
                    error = %err,
                    "failed to persist discard marker"
                );
            }
            tracing::info!(
                target: "offline::sync",
                id = %id,
                "discard deferred until upload resolves"
            );
            return Ok(DiscardOutcome::Deferred);
        };

        let removed = self.store.remove(id).await?;
        drop(claim);
        drop(finalize);
        self.refresh_after_mutation().await;

        if removed {
            tracing::info!(target: "offline::sync", id = %id, "offline inspection discarded");
            Ok(DiscardOutcome::Removed)
        } else {
            Ok(DiscardOutcome::NotFound)
        }
    }

    /// ユーザーによる修正。送信中のレコードは修正できない。
    pub async fn amend(
        &self,
        id: &OfflineInspectionId,
        payload: InspectionPayload,
    ) -> Result<OfflineInspectionRecord, AppError> {
        let finalize = self.finalize_gate.lock().await;
        let Some(claim) = self.try_claim(id) else {
            return Err(AppError::InvalidTransition(format!(
                "offline inspection {id} is being uploaded"
            )));
        };

        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("offline inspection {id}")))?;
        if record.discard_requested() {
            return Err(AppError::InvalidTransition(format!(
                "offline inspection {id} is scheduled for removal"
            )));
        }
        record.amend_payload(payload, now_millis())?;
        self.store.put(&record).await?;
        drop(claim);
        drop(finalize);

        self.refresh_after_mutation().await;
        Ok(record)
    }

    pub async fn purge_synced_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let removed = self.store.remove_synced_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(target: "offline::sync", removed, "purged synced inspections");
        }
        Ok(removed)
    }

    /// 送信中でない `UPLOADING` を中断として `FAILED` に戻す。`SYNCED` とはみなさない。
    /// 破棄予約済みのレコードは状態に関係なく削除する。
    pub async fn recover_interrupted(&self) -> Result<u32, AppError> {
        let candidates: Vec<OfflineInspectionId> = self
            .store
            .list_unsynced()
            .await?
            .into_iter()
            .filter(|r| r.status() == RecordStatus::Uploading || r.discard_requested())
            .map(|r| r.id().clone())
            .collect();
        let mut recovered = 0;
        let mut removed_any = false;

        for id in candidates {
            let _finalize = self.finalize_gate.lock().await;
            let Some(_claim) = self.try_claim(&id) else {
                continue;
            };
            // 一覧取得後に結果が確定している場合があるので読み直す。
            let Some(mut record) = self.store.get(&id).await? else {
                continue;
            };

            if record.discard_requested() {
                self.store.remove(&id).await?;
                removed_any = true;
                tracing::info!(
                    target: "offline::sync",
                    id = %id,
                    status = %record.status(),
                    "removed record scheduled for discard"
                );
                continue;
            }
            if record.status() != RecordStatus::Uploading {
                continue;
            }

            record.mark_interrupted(now_millis())?;
            self.store.put(&record).await?;
            self.publish(&record);
            recovered += 1;
            tracing::warn!(
                target: "offline::sync",
                id = %id,
                "recovered interrupted upload"
            );
        }

        if recovered > 0 || removed_any {
            self.refresh_after_mutation().await;
        }
        Ok(recovered)
    }

    async fn attempt(
        &self,
        id: &OfflineInspectionId,
        trigger: SyncTrigger,
        manual: bool,
    ) -> Result<AttemptResult, AppError> {
        let Some(claim) = self.try_claim(id) else {
            tracing::debug!(target: "offline::sync", id = %id, "attempt already in flight");
            return Ok(AttemptResult::Skipped);
        };

        match self.submit_claimed(id, manual).await {
            Ok(Some((record, result, duration_ms))) => {
                self.finalize(&record, claim).await?;
                self.record_attempt_metrics(&record, result, trigger, duration_ms);
                Ok(result)
            }
            Ok(None) => {
                self.release(id, claim).await?;
                Ok(AttemptResult::Skipped)
            }
            Err(err) => {
                if let Err(release_err) = self.release(id, claim).await {
                    tracing::warn!(
                        target: "offline::sync",
                        id = %id,
                        error = %release_err,
                        "failed to release aborted attempt"
                    );
                }
                Err(err)
            }
        }
    }

    /// 呼び出し側がレコードの排他を保持している前提で送信する。
    async fn submit_claimed(
        &self,
        id: &OfflineInspectionId,
        manual: bool,
    ) -> Result<Option<(OfflineInspectionRecord, AttemptResult, u64)>, AppError> {
        let Some(mut record) = self.store.get(id).await? else {
            return Ok(None);
        };
        let eligible = if manual {
            !record.discard_requested()
                && matches!(record.status(), RecordStatus::Pending | RecordStatus::Failed)
        } else {
            record.is_auto_sync_candidate()
        };
        if !eligible {
            return Ok(None);
        }

        record.begin_upload(now_millis())?;
        self.store.put(&record).await?;
        self.publish(&record);
        self.refresh_after_mutation().await;

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.submit_timeout, self.client.submit(&record)).await;
        let duration_ms = elapsed_ms(started);

        let now = now_millis();
        let result = match outcome {
            Ok(SubmitOutcome::Accepted(server_id)) => {
                record.mark_synced(server_id, now)?;
                AttemptResult::Synced
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                record.mark_failed(FailureKind::Rejected, reason, now)?;
                AttemptResult::Failed(FailureKind::Rejected)
            }
            Ok(SubmitOutcome::TransientFailure { reason }) => {
                record.mark_failed(FailureKind::Transient, reason, now)?;
                AttemptResult::Failed(FailureKind::Transient)
            }
            Err(_) => {
                record.mark_failed(FailureKind::Timeout, TIMEOUT_REASON, now)?;
                AttemptResult::Failed(FailureKind::Timeout)
            }
        };

        Ok(Some((record, result, duration_ms)))
    }

    /// 送信せずに排他を解放する。破棄予約があればここで削除する。
    async fn release(
        &self,
        id: &OfflineInspectionId,
        claim: InFlightClaim,
    ) -> Result<(), AppError> {
        let _finalize = self.finalize_gate.lock().await;
        let discard = lock_state(&self.in_flight)
            .discard_on_release
            .remove(id.as_str());
        let removed = if discard {
            self.store.remove(id).await.map(|_| ())
        } else {
            Ok(())
        };
        drop(claim);
        if discard && removed.is_ok() {
            self.refresh_after_mutation().await;
        }
        removed
    }

    /// 結果を書き込む。破棄予約があればレコードごと削除する。
    async fn finalize(
        &self,
        record: &OfflineInspectionRecord,
        claim: InFlightClaim,
    ) -> Result<(), AppError> {
        let finalize = self.finalize_gate.lock().await;
        let discard = lock_state(&self.in_flight)
            .discard_on_release
            .remove(record.id().as_str());

        let written = if discard {
            self.store.remove(record.id()).await.map(|_| ())
        } else {
            self.store.put(record).await
        };
        drop(claim);
        drop(finalize);

        if let Err(err) = written {
            tracing::error!(
                target: "offline::sync",
                id = %record.id(),
                status = %record.status(),
                error = %err,
                "failed to persist sync outcome; record will be recovered as interrupted"
            );
            return Err(err);
        }
        self.refresh_after_mutation().await;

        if discard {
            tracing::info!(
                target: "offline::sync",
                id = %record.id(),
                "deferred discard applied"
            );
        } else {
            self.publish(record);
        }
        Ok(())
    }

    fn try_claim(&self, id: &OfflineInspectionId) -> Option<InFlightClaim> {
        let mut state = lock_state(&self.in_flight);
        if !state.active.insert(id.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            state: Arc::clone(&self.in_flight),
            id: id.to_string(),
        })
    }

    fn publish(&self, record: &OfflineInspectionRecord) {
        let _ = self.status_tx.send(StatusChange {
            id: record.id().clone(),
            status: record.status(),
            at: record.updated_at(),
        });
    }

    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.refresh_pending_count().await {
            tracing::warn!(
                target: "offline::sync",
                error = %err,
                "failed to refresh pending count"
            );
        }
    }

    fn record_attempt_metrics(
        &self,
        record: &OfflineInspectionRecord,
        result: AttemptResult,
        trigger: SyncTrigger,
        duration_ms: u64,
    ) {
        let meta = AttemptMetadata {
            record_id: Some(record.id().to_string()),
            failure_kind: record.failure_kind(),
            error: record.last_error().map(str::to_string),
            trigger: Some(trigger),
            duration_ms: Some(duration_ms),
        };
        match result {
            AttemptResult::Synced => {
                self.metrics
                    .record_attempt(AttemptOutcomeStatus::Synced, &meta);
                tracing::info!(
                    target: "offline::sync",
                    id = %record.id(),
                    server_id = ?record.server_inspection_id().map(|id| id.value()),
                    duration_ms,
                    "offline inspection synced"
                );
            }
            AttemptResult::Failed(kind) => {
                self.metrics
                    .record_attempt(AttemptOutcomeStatus::Failed, &meta);
                tracing::warn!(
                    target: "offline::sync",
                    id = %record.id(),
                    failure_kind = %kind,
                    error = record.last_error().unwrap_or_default(),
                    attempts = record.attempt_count(),
                    "offline inspection sync failed"
                );
            }
            AttemptResult::Skipped => {}
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shared::tests::mocks::{
        InMemoryRecordStore, ScriptedReconciliationClient,
    };
    use crate::domain::entities::{
        CapturedInspection, InspectionAnswer, OfflineInspectionParts, truncate_to_millis,
    };
    use crate::domain::value_objects::{AnswerResult, ServerInspectionId};
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Notify;

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        client: Arc<ScriptedReconciliationClient>,
        manager: Arc<SyncQueueManager>,
    }

    fn harness_with_timeout(timeout: Duration) -> Harness {
        let store = Arc::new(InMemoryRecordStore::default());
        let client = Arc::new(ScriptedReconciliationClient::new());
        let manager = Arc::new(SyncQueueManager::new(
            store.clone(),
            client.clone(),
            timeout,
        ));
        Harness {
            store,
            client,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with_timeout(Duration::from_secs(5))
    }

    fn record_at(offset_ms: i64) -> OfflineInspectionRecord {
        let captured_at = truncate_to_millis(Utc::now()) + ChronoDuration::milliseconds(offset_ms);
        let mut payload = InspectionPayload::new(captured_at);
        payload.upsert_answer(InspectionAnswer::new("q1", AnswerResult::Safe, None));
        OfflineInspectionRecord::from_capture(CapturedInspection {
            id: OfflineInspectionId::generate(),
            line_item_ref: 42,
            inspector_ref: 7,
            payload,
            captured_at,
        })
    }

    async fn wait_for_submission(client: &ScriptedReconciliationClient) {
        wait_for_submissions(client, 1).await;
    }

    async fn wait_for_submissions(client: &ScriptedReconciliationClient, count: usize) {
        for _ in 0..200 {
            if client.submitted().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("submit was called fewer than {count} times");
    }

    fn stored_as(
        base: &OfflineInspectionRecord,
        status: RecordStatus,
        discard_requested: bool,
    ) -> OfflineInspectionRecord {
        OfflineInspectionRecord::from_parts(OfflineInspectionParts {
            id: base.id().clone(),
            server_inspection_id: None,
            line_item_ref: base.line_item_ref(),
            inspector_ref: base.inspector_ref(),
            status,
            payload: base.payload().clone(),
            created_at: base.created_at(),
            updated_at: base.created_at(),
            synced_at: None,
            last_error: None,
            failure_kind: None,
            attempt_count: 1,
            last_attempt_at: Some(base.created_at()),
            discard_requested,
        })
    }

    #[tokio::test]
    async fn accepted_submission_marks_record_synced() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        assert_eq!(h.manager.pending_count(), 1);

        h.client.push(SubmitOutcome::Accepted(ServerInspectionId::new(77).unwrap()));
        let report = h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.pending_after, 0);
        assert_eq!(h.manager.pending_count(), 0);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Synced);
        assert_eq!(stored.server_inspection_id().map(|id| id.value()), Some(77));
        assert!(stored.synced_at().is_some());
        assert_eq!(h.manager.metrics().total_synced, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_on_next_pass() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        h.client.push(SubmitOutcome::transient("503 Service Unavailable"));
        let first = h.manager.run_sync_pass(SyncTrigger::Interval).await.unwrap();
        assert_eq!(first.failed, 1);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Failed);
        assert_eq!(stored.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(stored.last_error(), Some("503 Service Unavailable"));
        assert_eq!(h.manager.pending_count(), 1);

        h.client.push(SubmitOutcome::Accepted(ServerInspectionId::new(5).unwrap()));
        let second = h.manager.run_sync_pass(SyncTrigger::Interval).await.unwrap();
        assert_eq!(second.synced, 1);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Synced);
        assert_eq!(stored.last_error(), None);
        assert_eq!(stored.attempt_count(), 2);
    }

    #[tokio::test]
    async fn rejected_records_wait_for_amendment_or_manual_retry() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        h.client.push(SubmitOutcome::rejected("line item is closed"));
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        let report = h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(h.client.submitted().len(), 1);

        let result = h.manager.retry(record.id()).await.unwrap();
        assert_eq!(result, AttemptResult::Synced);
        assert_eq!(h.client.submitted().len(), 2);
    }

    #[tokio::test]
    async fn amend_clears_rejection() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.client.push(SubmitOutcome::rejected("missing answer"));
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        let mut payload = record.payload().clone();
        payload.upsert_answer(InspectionAnswer::new("q2", AnswerResult::NotSafe, None));
        let amended = h.manager.amend(record.id(), payload).await.unwrap();
        assert_eq!(amended.failure_kind(), None);
        assert_eq!(amended.status(), RecordStatus::Failed);

        let report = h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();
        assert_eq!(report.synced, 1);
    }

    #[tokio::test]
    async fn submit_timeout_marks_record_failed() {
        let h = harness_with_timeout(Duration::from_millis(30));
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.client.set_delay(Duration::from_millis(500));

        let report = h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Failed);
        assert_eq!(stored.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(stored.last_error(), Some(TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn records_are_processed_oldest_first() {
        let h = harness();
        let newer = record_at(1_000);
        let older = record_at(0);
        h.manager.enqueue(&newer).await.unwrap();
        h.manager.enqueue(&older).await.unwrap();

        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();
        assert_eq!(
            h.client.submitted(),
            vec![older.id().to_string(), newer.id().to_string()]
        );
    }

    #[tokio::test]
    async fn one_failing_record_does_not_stop_the_pass() {
        let h = harness();
        let first = record_at(0);
        let second = record_at(10);
        h.manager.enqueue(&first).await.unwrap();
        h.manager.enqueue(&second).await.unwrap();

        h.client.push(SubmitOutcome::transient("connection reset"));
        let report = h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.pending_after, 1);
    }

    #[tokio::test]
    async fn unreachable_remote_leaves_records_untouched() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.client.set_reachable(false);

        let report = h.manager.run_sync_pass(SyncTrigger::Connectivity).await.unwrap();
        assert!(report.offline);
        assert_eq!(report.attempted, 0);
        assert!(h.client.submitted().is_empty());

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_pass_is_coalesced() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());

        let manager = h.manager.clone();
        let first = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });
        wait_for_submission(&h.client).await;

        let second = h.manager.run_sync_pass(SyncTrigger::Interval).await.unwrap();
        assert!(second.coalesced);
        assert_eq!(second.attempted, 0);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.synced, 1);
        assert_eq!(h.client.submitted().len(), 1);
    }

    #[tokio::test]
    async fn retry_is_a_no_op_while_in_flight() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });
        wait_for_submission(&h.client).await;

        assert!(h.manager.is_in_flight(record.id()));
        let result = h.manager.retry(record.id()).await.unwrap();
        assert_eq!(result, AttemptResult::Skipped);

        gate.notify_one();
        pass.await.unwrap().unwrap();
        assert_eq!(h.client.submitted().len(), 1);
        assert!(!h.manager.is_in_flight(record.id()));
    }

    #[tokio::test]
    async fn discard_during_upload_is_deferred_until_outcome() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });
        wait_for_submission(&h.client).await;

        let outcome = h.manager.discard(record.id()).await.unwrap();
        assert_eq!(outcome, DiscardOutcome::Deferred);
        assert!(h.store.get(record.id()).await.unwrap().is_some());

        gate.notify_one();
        pass.await.unwrap().unwrap();
        assert!(h.store.get(record.id()).await.unwrap().is_none());
        assert_eq!(h.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn discard_removes_idle_record_immediately() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        assert_eq!(
            h.manager.discard(record.id()).await.unwrap(),
            DiscardOutcome::Removed
        );
        assert_eq!(h.manager.pending_count(), 0);
        assert_eq!(
            h.manager.discard(record.id()).await.unwrap(),
            DiscardOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn stale_uploading_records_are_recovered_as_interrupted() {
        let h = harness();
        let mut record = record_at(0);
        record.begin_upload(now_millis()).unwrap();
        h.store.insert_raw(record.clone()).await;

        let recovered = h.manager.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Failed);
        assert_eq!(stored.failure_kind(), Some(FailureKind::Interrupted));
        assert_eq!(stored.last_error(), Some("interrupted"));
        assert_eq!(h.manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn interrupted_upload_marked_for_discard_is_removed_on_recovery() {
        let h = harness();
        let base = record_at(0);
        h.store
            .insert_raw(stored_as(&base, RecordStatus::Uploading, true))
            .await;

        h.manager.recover_interrupted().await.unwrap();
        assert!(h.store.get(base.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_record_marked_for_discard_is_removed_on_recovery_whatever_its_status() {
        let h = harness();
        let pending = record_at(0);
        let failed = record_at(10);
        h.store
            .insert_raw(stored_as(&pending, RecordStatus::Pending, true))
            .await;
        h.store
            .insert_raw(stored_as(&failed, RecordStatus::Failed, true))
            .await;
        h.manager.refresh_pending_count().await.unwrap();
        assert_eq!(h.manager.pending_count(), 2);

        let recovered = h.manager.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 0);
        assert!(h.store.get(pending.id()).await.unwrap().is_none());
        assert!(h.store.get(failed.id()).await.unwrap().is_none());
        assert_eq!(h.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn deferred_discard_marker_does_not_rewrite_upload_status() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });
        wait_for_submission(&h.client).await;

        assert_eq!(
            h.manager.discard(record.id()).await.unwrap(),
            DiscardOutcome::Deferred
        );
        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Uploading);
        assert!(stored.discard_requested());

        // 古いコピーで上書きされてもマーカーは残り、回復時に削除される。
        h.store.put(&record).await.unwrap();
        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Pending);
        assert!(stored.discard_requested());

        gate.notify_one();
        pass.await.unwrap().unwrap();
        assert!(h.store.get(record.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recovery_does_not_overwrite_a_rejection_written_while_it_waited() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        h.client.push(SubmitOutcome::rejected("line item is closed"));
        let manager = h.manager.clone();
        let id = record.id().clone();
        let retry = tokio::spawn(async move { manager.retry(&id).await });
        wait_for_submission(&h.client).await;

        // 結果の書き込みと回復処理の両方を finalize_gate の前で待たせる。
        let held = h.manager.finalize_gate.lock().await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Interval).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert_eq!(
            retry.await.unwrap().unwrap(),
            AttemptResult::Failed(FailureKind::Rejected)
        );
        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.attempted, 0);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Failed);
        assert_eq!(stored.failure_kind(), Some(FailureKind::Rejected));
        assert_eq!(stored.last_error(), Some("line item is closed"));
        assert_eq!(h.client.submitted().len(), 1);
    }

    #[tokio::test]
    async fn recovery_leaves_a_record_synced_while_it_waited() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let id = record.id().clone();
        let retry = tokio::spawn(async move { manager.retry(&id).await });
        wait_for_submission(&h.client).await;

        let held = h.manager.finalize_gate.lock().await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Interval).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert_eq!(retry.await.unwrap().unwrap(), AttemptResult::Synced);
        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.pending_after, 0);

        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Synced);
        assert_eq!(h.client.submitted().len(), 1);
    }

    #[tokio::test]
    async fn pending_count_tracks_each_write_inside_a_pass() {
        let h = harness();
        let first = record_at(0);
        let second = record_at(10);
        h.manager.enqueue(&first).await.unwrap();
        h.manager.enqueue(&second).await.unwrap();
        assert_eq!(h.manager.pending_count(), 2);

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });

        wait_for_submissions(&h.client, 1).await;
        assert_eq!(h.manager.pending_count(), 1);
        assert_eq!(h.store.count_unsynced().await.unwrap(), 1);

        gate.notify_one();
        wait_for_submissions(&h.client, 2).await;
        assert_eq!(h.manager.pending_count(), 0);
        assert_eq!(h.store.count_unsynced().await.unwrap(), 0);

        gate.notify_one();
        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(h.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn status_changes_are_broadcast_in_order() {
        let h = harness();
        let mut rx = h.manager.subscribe_status_changes();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.client.push(SubmitOutcome::transient("offline"));
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            assert_eq!(&change.id, record.id());
            seen.push(change.status);
        }
        assert_eq!(
            seen,
            vec![
                RecordStatus::Pending,
                RecordStatus::Uploading,
                RecordStatus::Failed,
                RecordStatus::Uploading,
                RecordStatus::Synced,
            ]
        );
    }

    #[tokio::test]
    async fn storage_failure_on_outcome_is_surfaced_and_recovered() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.client.block_on(gate.clone());
        let manager = h.manager.clone();
        let pass = tokio::spawn(async move { manager.run_sync_pass(SyncTrigger::Manual).await });
        wait_for_submission(&h.client).await;

        h.store.fail_puts(true);
        gate.notify_one();
        let report = pass.await.unwrap();
        h.store.fail_puts(false);

        // 件数の再計算は読み取りのみなのでパス自体は完了する。
        let report = report.unwrap();
        assert_eq!(report.failed, 1);
        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Uploading);

        h.manager.recover_interrupted().await.unwrap();
        let stored = h.store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(stored.failure_kind(), Some(FailureKind::Interrupted));
    }

    #[tokio::test]
    async fn retry_of_synced_record_is_rejected() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        let err = h.manager.retry(record.id()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let missing = OfflineInspectionId::generate();
        assert!(matches!(
            h.manager.retry(&missing).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn purge_keeps_recent_synced_records() {
        let h = harness();
        let record = record_at(0);
        h.manager.enqueue(&record).await.unwrap();
        h.manager.run_sync_pass(SyncTrigger::Manual).await.unwrap();

        let removed = h
            .manager
            .purge_synced_before(Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = h
            .manager
            .purge_synced_before(Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
