use std::path::PathBuf;

use thiserror::Error;
use tidemark_core::{ArchiveError, RetryError, SourceError, ValidationError};
use tidemark_warehouse::WarehouseError;

/// Errors raised while loading or validating [`crate::IngestConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to parse config file {path}: {error}")]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure of one source run. Converted into a FAILED outcome at the
/// ingestor boundary; never escapes to the orchestrator.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] WarehouseError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] RetryError<SourceError>),

    #[error("archive failed: {0}")]
    Archive(#[from] RetryError<ArchiveError>),

    #[error("write failed: {0}")]
    Write(#[from] RetryError<WarehouseError>),

    #[error("archive encoding failed: {0}")]
    ArchiveEncoding(#[from] ArchiveError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Run-level failure: nothing was attempted.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("store precheck failed: {0}")]
    Precheck(#[source] WarehouseError),
}
