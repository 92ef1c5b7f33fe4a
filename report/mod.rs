//! Aggregations behind the interactive dashboard, computed over persisted year results.

pub mod summary;
