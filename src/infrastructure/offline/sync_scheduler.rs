use super::metrics::SyncTrigger;
use crate::application::services::SyncQueueManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

/// 定期実行と接続回復時に同期パスを起動する。
pub struct SyncScheduler;

impl SyncScheduler {
    /// 起動直後に1回、以後 `period` ごとに同期パスを実行する。
    pub fn spawn(queue: Arc<SyncQueueManager>, period: Duration) -> SyncSchedulerHandle {
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_wake = Arc::clone(&wake);

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                target: "offline::sync",
                period_secs = period.as_secs(),
                "sync scheduler started"
            );

            loop {
                let trigger = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = tick.tick() => SyncTrigger::Interval,
                    _ = task_wake.notified() => SyncTrigger::Connectivity,
                };

                if let Err(err) = queue.run_sync_pass(trigger).await {
                    tracing::error!(
                        target: "offline::sync",
                        trigger = %trigger,
                        error = %err,
                        "scheduled sync pass failed"
                    );
                }
            }

            tracing::info!(target: "offline::sync", "sync scheduler stopped");
        });

        SyncSchedulerHandle {
            wake,
            shutdown_tx,
            task,
        }
    }
}

pub struct SyncSchedulerHandle {
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncSchedulerHandle {
    /// 接続が回復したことを通知し、次の定期実行を待たずに同期する。
    pub fn connectivity_regained(&self) {
        self.wake.notify_one();
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(target: "offline::sync", error = %err, "sync scheduler task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::RecordStore;
    use crate::application::shared::tests::mocks::{
        InMemoryRecordStore, ScriptedReconciliationClient,
    };
    use crate::domain::entities::{
        CapturedInspection, InspectionAnswer, InspectionPayload, OfflineInspectionRecord,
        now_millis,
    };
    use crate::domain::value_objects::{AnswerResult, OfflineInspectionId, RecordStatus};

    fn record() -> OfflineInspectionRecord {
        let mut payload = InspectionPayload::new(now_millis());
        payload.upsert_answer(InspectionAnswer::new("q", AnswerResult::Safe, None));
        OfflineInspectionRecord::from_capture(CapturedInspection {
            id: OfflineInspectionId::generate(),
            line_item_ref: 1,
            inspector_ref: 1,
            payload,
            captured_at: now_millis(),
        })
    }

    async fn wait_for_status(
        store: &InMemoryRecordStore,
        id: &OfflineInspectionId,
        status: RecordStatus,
    ) {
        for _ in 0..200 {
            if let Some(record) = store.get(id).await.unwrap()
                && record.status() == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("record {id} never reached {status}");
    }

    #[tokio::test]
    async fn runs_on_start_and_on_connectivity_regained() {
        let store = Arc::new(InMemoryRecordStore::default());
        let client = Arc::new(ScriptedReconciliationClient::new());
        let queue = Arc::new(SyncQueueManager::new(
            store.clone(),
            client.clone(),
            Duration::from_secs(5),
        ));

        let first = record();
        queue.enqueue(&first).await.unwrap();

        let handle = SyncScheduler::spawn(queue.clone(), Duration::from_secs(3600));
        wait_for_status(&store, first.id(), RecordStatus::Synced).await;

        let second = record();
        queue.enqueue(&second).await.unwrap();
        handle.connectivity_regained();
        wait_for_status(&store, second.id(), RecordStatus::Synced).await;

        handle.shutdown().await;
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(client.submitted().len(), 2);
    }
}
