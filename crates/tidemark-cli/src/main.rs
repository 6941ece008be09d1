mod cli;
mod commands;
mod error;
mod logging;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose)?;

    let report = commands::run(&cli).await?;
    println!("{report}");
    Ok(ExitCode::SUCCESS)
}
