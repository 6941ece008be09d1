use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::LogFormat;
use crate::error::CliError;

/// Install the global subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init(format: LogFormat, verbose: bool) -> Result<(), CliError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|error| CliError::Logging(error.to_string()))
}
