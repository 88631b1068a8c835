pub mod asset_compressor;
pub mod reconciliation;
pub mod record_store;

pub use asset_compressor::AssetCompressor;
pub use reconciliation::{ReconciliationClient, SubmitOutcome};
pub use record_store::RecordStore;
