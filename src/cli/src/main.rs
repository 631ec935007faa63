//! A3S Mirror CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_mirror_cli::commands::{dispatch, load_config, Cli};
use a3s_mirror_core::log::LogFormat;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.global) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter_directive()));
    match config.log.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }

    if let Err(e) = dispatch(cli, config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
