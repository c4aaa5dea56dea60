//! Rollcall CLI entry point

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use rollcall_ble::{HostRadio, PresenceEngine, SystemTimeSource};
use rollcall_cli::{
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::AppConfig,
    error::{CliError, Result},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(cli.verbose);
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    setup_logging(cli.verbose || config.cli.verbose);

    // Runs before the radio is touched
    if let Commands::ExampleConfig { output } = &cli.command {
        if let Err(e) = CommandDispatcher::handle_example_config_command(output.as_deref()) {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(scheme) = cli.scheme {
        config.engine.beacon_scheme = scheme.into();
    }
    let json = cli.json || config.cli.json_output;

    let engine = match create_engine(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize Bluetooth: {}", e);
            std::process::exit(1);
        }
    };

    let result = CommandDispatcher::execute(cli.command, &engine, &config, json).await;
    engine.shutdown().await;

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Rollcall exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        Ok(AppConfig::load_from_file(config_path)?)
    } else {
        Ok(AppConfig::load()?)
    }
}

async fn create_engine(config: &AppConfig) -> Result<PresenceEngine> {
    let radio = HostRadio::new(config.engine.connection_timeout())
        .await
        .map_err(|e| CliError::RadioInit(e.to_string()))?;

    info!("Using beacon scheme {:?}", config.engine.beacon_scheme);
    Ok(PresenceEngine::new(
        Arc::new(radio),
        Arc::new(SystemTimeSource),
        config.engine.clone(),
    )?)
}
