pub mod offline;

pub use offline::{
    AnswerResult, FailureKind, GeoTag, OfflineInspectionId, RecordStatus, ServerInspectionId,
};
