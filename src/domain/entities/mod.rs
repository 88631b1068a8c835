pub mod offline;

pub use offline::{
    CapturedInspection, EncodedImage, INTERRUPTED_REASON, InspectionAnswer, InspectionPayload,
    OfflineInspectionParts, OfflineInspectionRecord, PhotoAttachment, StatusChange,
    SyncPassReport, TIMEOUT_REASON, now_millis, sha256_hex, truncate_to_millis,
};
