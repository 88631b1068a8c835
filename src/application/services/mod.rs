pub mod capture_session;
pub mod offline_inspection_service;
pub mod sync_queue;

pub use capture_session::CaptureSession;
pub use offline_inspection_service::{OfflineInspectionService, OfflineInspectionServiceTrait};
pub use sync_queue::{AttemptResult, DiscardOutcome, SyncQueueManager};
