pub mod answer_result;
pub mod failure_kind;
pub mod geo_tag;
pub mod inspection_id;
pub mod record_status;
pub mod server_inspection_id;

pub use answer_result::AnswerResult;
pub use failure_kind::FailureKind;
pub use geo_tag::GeoTag;
pub use inspection_id::OfflineInspectionId;
pub use record_status::RecordStatus;
pub use server_inspection_id::ServerInspectionId;
