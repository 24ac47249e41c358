//! convsync - conversation persistence and sync CLI
//!
#![doc = "Main entry point for the convsync command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use convsync::cli::Cli;
use convsync::commands;
use convsync::config::Config;
use convsync::sync::metrics::init_metrics_exporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);
    init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    tracing::debug!(owner = %cli.owner, "Dispatching command");
    commands::conversations::handle_command(&config, &cli.owner, cli.command).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "convsync=debug"
    } else {
        "convsync=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
