pub mod ingestion;
pub mod powerbi;
pub mod reporting;
