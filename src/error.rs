//! Typed errors for failures callers may want to inspect.
//!
//! Most operations return `anyhow::Result`; these enums are wrapped inside
//! it and can be recovered with `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the catalog beyond plain SQLite failures
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Photo {0} not found in catalog")]
    PhotoNotFound(i64),

    #[error("Stored encoding has {len} bytes, which is not a whole number of f32 values")]
    InvalidEncoding { len: usize },
}

/// Errors raised while setting up or driving ingestion
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Model {name} is unavailable: {reason}")]
    ModelUnavailable { name: String, reason: String },
}
