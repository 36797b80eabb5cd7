//! # Error Types
//!
//! Failures of the fetch-and-aggregate pipeline, grouped by the stage that
//! raised them. Authentication and catalog errors abort a run; per-file read
//! failures are absorbed by the worker pool and never surface here.

use crate::storage::StorageError;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Earthdata authentication failed: {0}")]
    Auth(String),

    #[error("Catalog search failed: {0}")]
    Catalog(String),

    #[error("Network request failed for {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("NetCDF error in '{path}': {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("Invalid granule layout in '{path}': {message}")]
    Layout { path: PathBuf, message: String },

    #[error("Failed processing DataFrame: {0}")]
    Polars(#[from] PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Aggregation failed: {0}")]
    Aggregate(String),
}

impl PipelineError {
    pub(crate) fn netcdf(path: impl Into<PathBuf>, source: netcdf::Error) -> Self {
        PipelineError::NetCdf {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn layout(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Layout {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        PipelineError::Http {
            url: url.into(),
            source,
        }
    }
}
