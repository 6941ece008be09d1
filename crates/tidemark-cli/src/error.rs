use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] tidemark_ingest::ConfigError),

    #[error(transparent)]
    Validation(#[from] tidemark_core::ValidationError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("store precheck failed: {0}")]
    Precheck(#[source] tidemark_warehouse::WarehouseError),

    #[error(transparent)]
    Store(#[from] tidemark_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

impl From<tidemark_ingest::RunError> for CliError {
    fn from(error: tidemark_ingest::RunError) -> Self {
        match error {
            tidemark_ingest::RunError::Precheck(source) => Self::Precheck(source),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Argument(_) => 2,
            Self::Precheck(_) => 3,
            Self::Store(_) | Self::Serialization(_) | Self::Logging(_) => 4,
        }
    }
}
