//! CLI for the toolgate binary
//!
//! `serve` starts the gateway; `check-config` loads and validates the
//! layered configuration plus the tenants file without binding a port.

use clap::{Parser, Subcommand};
use toolgate_core::StaticTenantStore;
use tracing::info;

/// Toolgate gateway CLI
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Multi-tenant tool-invocation gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate configuration and the tenants file, then exit
    CheckConfig,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::CheckConfig) => check_config(),
        Some(Commands::Serve) | None => crate::server::run().await,
    }
}

fn check_config() -> anyhow::Result<()> {
    let config = crate::config::load_config()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration OK"
    );
    let store = StaticTenantStore::from_file(&config.tenants.file)
        .map_err(|e| anyhow::anyhow!("tenants file rejected: {e}"))?;
    drop(store);
    println!("configuration valid");
    Ok(())
}
