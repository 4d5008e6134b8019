#![allow(clippy::result_large_err)]

use clap::Parser;
use dotenvy::dotenv;
use std::process::ExitCode;
use threedpot::{
    cli::{self, Cli, Command},
    config::Settings,
    logging,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load .env before anything reads the environment
    let dotenv_loaded = dotenv().is_ok();
    let cli = Cli::parse();

    // 2. Settings: TOML file, then environment overrides
    let settings = match Settings::load(cli.config_path()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    // 3. Tracing, now that the configured level is known
    if let Err(e) = logging::init_tracing(&settings.logging.level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    info!(
        environment = settings.environment.as_str(),
        dotenv = dotenv_loaded,
        "configuration loaded"
    );

    // 4. Run the requested command
    match cli::run(cli.command.unwrap_or(Command::Serve), settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
