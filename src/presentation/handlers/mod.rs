pub mod offline_inspection_handler;

pub use offline_inspection_handler::OfflineInspectionHandler;
