pub mod captured_inspection;
pub mod encoded_image;
pub mod offline_inspection;
pub mod payload;
pub mod sync_report;

pub use captured_inspection::CapturedInspection;
pub use encoded_image::{EncodedImage, sha256_hex};
pub use offline_inspection::{
    INTERRUPTED_REASON, OfflineInspectionParts, OfflineInspectionRecord, TIMEOUT_REASON,
    now_millis, truncate_to_millis,
};
pub use payload::{InspectionAnswer, InspectionPayload, PhotoAttachment};
pub use sync_report::{StatusChange, SyncPassReport};
