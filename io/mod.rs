//! Everything that touches the filesystem: run configuration, raw source ingestion,
//! long-table loading and result persistence.

pub mod config;
pub mod data;
pub mod ingest;
pub mod results;
