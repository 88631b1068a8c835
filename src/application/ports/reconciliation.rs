use crate::domain::entities::OfflineInspectionRecord;
use crate::domain::value_objects::ServerInspectionId;
use async_trait::async_trait;

/// サーバーへの送信結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(ServerInspectionId),
    /// 恒久的な拒否。修正されるまで自動再送しない。
    Rejected { reason: String },
    TransientFailure { reason: String },
}

impl SubmitOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        SubmitOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        SubmitOutcome::TransientFailure {
            reason: reason.into(),
        }
    }
}

/// リモートAPIとの突き合わせ。ローカル状態は変更しない。
///
/// 同じレコードIDでの再送は同じサーバーIDを返す（冪等）ことを前提とする。
#[async_trait]
pub trait ReconciliationClient: Send + Sync {
    async fn submit(&self, record: &OfflineInspectionRecord) -> SubmitOutcome;

    async fn is_reachable(&self) -> bool {
        true
    }
}
