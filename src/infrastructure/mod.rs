pub mod database;
pub mod media;
pub mod offline;
pub mod reconciliation;
