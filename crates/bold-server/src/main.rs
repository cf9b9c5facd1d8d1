//! Bold smart-lock daemon
//!
//! Loads `configuration.yaml` and the stored entries from the config
//! directory. Without a subcommand every entry is set up and polled until
//! interrupted; the subcommands add accounts or drive a single action.

mod args;
mod host;
mod login;

use anyhow::{Context as _, Result};
use bold_config::Settings;
use bold_core::events::StateChangedData;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command};
use crate::host::Host;

#[tokio::main]
async fn main() -> Result<()> {
    let (config_dir, command) = Cli::parse().into_parts();
    let settings = Settings::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logger.default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(config_dir = %config_dir.display(), "Starting Bold");
    let host = Host::load(&config_dir, &settings).await?;

    let result = execute(&host, command).await;
    host.shutdown().await?;
    result
}

async fn execute(host: &Host, command: Command) -> Result<()> {
    match command {
        Command::Run => run(host).await,
        Command::Login { email } => {
            let entry_id = login::login(&host.integration.flow_manager(), email).await?;
            debug!(entry_id = %entry_id, "entry created");
            Ok(())
        }
        Command::Status => {
            host.setup().await;
            print_status(host);
            Ok(())
        }
        Command::Lock { entity_id } => {
            host.setup().await;
            host.integration.lock(&entity_id).await?;
            print_state(host, &entity_id);
            Ok(())
        }
        Command::Unlock { entity_id } => {
            host.setup().await;
            host.integration.unlock(&entity_id).await?;
            print_state(host, &entity_id);
            Ok(())
        }
        Command::Press { entity_id } => {
            host.setup().await;
            host.integration.press(&entity_id).await?;
            println!("{entity_id}: pressed");
            Ok(())
        }
        Command::Remove { entry_id } => {
            let entry = host.integration.remove_entry(&entry_id).await?;
            println!("Removed {}", entry.title);
            Ok(())
        }
    }
}

async fn run(host: &Host) -> Result<()> {
    let mut changes = host.bus.subscribe_typed::<StateChangedData>();
    let log_changes = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(event) => match event.data.new_state {
                    Some(state) => info!(
                        entity_id = %event.data.entity_id,
                        state = %state.state,
                        "state changed"
                    ),
                    None => debug!(entity_id = %event.data.entity_id, "state removed"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state change log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    host.setup().await;
    info!("Bold is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    log_changes.abort();
    Ok(())
}

fn print_status(host: &Host) {
    let entity_ids = host.integration.entity_ids();
    if entity_ids.is_empty() {
        println!("No entities");
        return;
    }
    for entity_id in entity_ids {
        print_state(host, &entity_id);
    }
}

fn print_state(host: &Host, entity_id: &str) {
    match host.states.get(entity_id) {
        Some(state) => println!("{entity_id}: {}", state.state),
        None => println!("{entity_id}: unknown"),
    }
}
