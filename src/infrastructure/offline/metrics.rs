use crate::domain::entities::SyncPassReport;
use crate::domain::value_objects::FailureKind;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcomeStatus {
    Synced,
    Failed,
}

/// 同期パスを起動したきっかけ。
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Interval,
    Connectivity,
    Retry,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Interval => "interval",
            SyncTrigger::Connectivity => "connectivity",
            SyncTrigger::Retry => "retry",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub total_synced: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub consecutive_failure: u64,
    pub total_passes: u64,
    pub coalesced_passes: u64,
    pub offline_passes: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_outcome: Option<AttemptOutcomeStatus>,
    pub last_record_id: Option<String>,
    pub last_failure_kind: Option<FailureKind>,
    pub last_error: Option<String>,
    pub last_trigger: Option<SyncTrigger>,
    pub last_attempt_duration_ms: Option<u64>,
    pub last_pass_duration_ms: Option<u64>,
    pub last_pass_attempted: Option<u32>,
    pub last_pass_synced: Option<u32>,
    pub last_pass_failed: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct AttemptMetadata {
    pub record_id: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub error: Option<String>,
    pub trigger: Option<SyncTrigger>,
    pub duration_ms: Option<u64>,
}

#[derive(Default, Clone)]
struct LastSyncMetadata {
    last_outcome: Option<AttemptOutcomeStatus>,
    record_id: Option<String>,
    failure_kind: Option<FailureKind>,
    error: Option<String>,
    trigger: Option<SyncTrigger>,
    attempt_duration_ms: Option<u64>,
    pass_duration_ms: Option<u64>,
    pass_attempted: Option<u32>,
    pass_synced: Option<u32>,
    pass_failed: Option<u32>,
}

/// 同期キューの送信結果カウンタ。
pub struct SyncMetrics {
    synced: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    consecutive_failure: AtomicU64,
    passes: AtomicU64,
    coalesced: AtomicU64,
    offline: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    metadata: Mutex<LastSyncMetadata>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            synced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            consecutive_failure: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            offline: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            metadata: Mutex::new(LastSyncMetadata::default()),
        }
    }

    pub fn record_attempt(&self, status: AttemptOutcomeStatus, meta: &AttemptMetadata) {
        match status {
            AttemptOutcomeStatus::Synced => {
                self.synced.fetch_add(1, Ordering::Relaxed);
                self.last_success_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.store(0, Ordering::Relaxed);
            }
            AttemptOutcomeStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if meta.failure_kind == Some(FailureKind::Rejected) {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                }
                self.last_failure_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut guard) = self.metadata.lock() {
            guard.last_outcome = Some(status);
            guard.record_id = meta.record_id.clone();
            guard.failure_kind = meta.failure_kind;
            guard.error = meta.error.clone();
            guard.trigger = meta.trigger;
            guard.attempt_duration_ms = meta.duration_ms;
        }
    }

    pub fn record_pass(&self, report: &SyncPassReport, trigger: SyncTrigger) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if report.coalesced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if report.offline {
            self.offline.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut guard) = self.metadata.lock() {
            guard.trigger = Some(trigger);
            guard.pass_duration_ms = Some(report.duration_ms);
            guard.pass_attempted = Some(report.attempted);
            guard.pass_synced = Some(report.synced);
            guard.pass_failed = Some(report.failed);
        }
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let metadata = self
            .metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| LastSyncMetadata::default());

        SyncMetricsSnapshot {
            total_synced: self.synced.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            total_passes: self.passes.load(Ordering::Relaxed),
            coalesced_passes: self.coalesced.load(Ordering::Relaxed),
            offline_passes: self.offline.load(Ordering::Relaxed),
            last_success_ms: to_option(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: to_option(self.last_failure_ms.load(Ordering::Relaxed)),
            last_outcome: metadata.last_outcome,
            last_record_id: metadata.record_id,
            last_failure_kind: metadata.failure_kind,
            last_error: metadata.error,
            last_trigger: metadata.trigger,
            last_attempt_duration_ms: metadata.attempt_duration_ms,
            last_pass_duration_ms: metadata.pass_duration_ms,
            last_pass_attempted: metadata.pass_attempted,
            last_pass_synced: metadata.pass_synced,
            last_pass_failed: metadata.pass_failed,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 { None } else { Some(value) }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_streak_resets_on_success() {
        let metrics = SyncMetrics::new();
        let failed = AttemptMetadata {
            record_id: Some("a".into()),
            failure_kind: Some(FailureKind::Rejected),
            error: Some("bad template".into()),
            trigger: Some(SyncTrigger::Interval),
            duration_ms: Some(12),
        };
        metrics.record_attempt(AttemptOutcomeStatus::Failed, &failed);
        metrics.record_attempt(AttemptOutcomeStatus::Failed, &AttemptMetadata::default());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_failed, 2);
        assert_eq!(snapshot.total_rejected, 1);
        assert_eq!(snapshot.consecutive_failure, 2);
        assert!(snapshot.last_failure_ms.is_some());
        assert!(snapshot.last_success_ms.is_none());

        metrics.record_attempt(
            AttemptOutcomeStatus::Synced,
            &AttemptMetadata {
                record_id: Some("b".into()),
                ..AttemptMetadata::default()
            },
        );
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_synced, 1);
        assert_eq!(snapshot.consecutive_failure, 0);
        assert_eq!(snapshot.last_outcome, Some(AttemptOutcomeStatus::Synced));
        assert_eq!(snapshot.last_record_id.as_deref(), Some("b"));
    }

    #[test]
    fn coalesced_passes_do_not_overwrite_last_pass() {
        let metrics = SyncMetrics::new();
        let report = SyncPassReport {
            attempted: 3,
            synced: 2,
            failed: 1,
            duration_ms: 40,
            ..SyncPassReport::default()
        };
        metrics.record_pass(&report, SyncTrigger::Manual);
        metrics.record_pass(&SyncPassReport::coalesced(1), SyncTrigger::Interval);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_passes, 2);
        assert_eq!(snapshot.coalesced_passes, 1);
        assert_eq!(snapshot.last_pass_attempted, Some(3));
        assert_eq!(snapshot.last_trigger, Some(SyncTrigger::Manual));
    }

    #[test]
    fn snapshot_serializes_in_camel_case() {
        let json = serde_json::to_value(SyncMetrics::new().snapshot()).unwrap();
        assert!(json.get("totalSynced").is_some());
        assert!(json.get("lastPassDurationMs").is_some());
    }
}
