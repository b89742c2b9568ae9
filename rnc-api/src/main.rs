//! `rnc` entry point
//!
//! Loads configuration from the environment, installs logging, opens the
//! store and runs one command.

use std::process::ExitCode;

use clap::Parser;
use rnc_api::{init_tracing, ApiResult, AppConfig, AppState, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rnc: {}", err.message);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> ApiResult<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format)?;

    let state = AppState::connect(&config).await?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    cli.execute(&state, &mut out).await
}
