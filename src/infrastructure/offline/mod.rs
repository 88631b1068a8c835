mod mappers;
pub mod metrics;
mod queries;
mod rows;
pub mod sqlite_store;
pub mod sync_scheduler;

pub use metrics::{SyncMetrics, SyncMetricsSnapshot, SyncTrigger};
pub use sqlite_store::SqliteRecordStore;
pub use sync_scheduler::{SyncScheduler, SyncSchedulerHandle};
