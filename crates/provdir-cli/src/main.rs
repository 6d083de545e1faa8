mod locations;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use provdir_core::{load_services_catalog, AppConfig, ServiceCatalog};
use provdir_locations::{Anonymous, BearerToken, CredentialProvider, ServiceNormalizer};
use tracing_subscriber::EnvFilter;

use crate::locations::LocationCommands;

#[derive(Debug, Parser)]
#[command(name = "provdir-cli")]
#[command(about = "Provider directory location management")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage one provider's locations
    Locations {
        /// Provider whose locations are edited
        #[arg(long, env = "PROVDIR_PROVIDER_ID")]
        provider: i64,
        #[command(subcommand)]
        command: LocationCommands,
    },
    /// List the services catalog
    Services,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("provdir-cli ready; see --help");
        return Ok(());
    };

    let config = provdir_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match command {
        Commands::Locations { provider, command } => {
            let normalizer = load_catalog(&config).map_or_else(
                ServiceNormalizer::without_catalog,
                ServiceNormalizer::new,
            );
            locations::run(&config, provider, credentials(&config), normalizer, command).await
        }
        Commands::Services => {
            let catalog = load_services_catalog(&config.services_path)?;
            print_catalog(&catalog);
            Ok(())
        }
    }
}

fn credentials(config: &AppConfig) -> Arc<dyn CredentialProvider> {
    match &config.api_token {
        Some(token) => Arc::new(BearerToken::new(token.clone())),
        None => Arc::new(Anonymous),
    }
}

/// A missing or broken catalog is not fatal: services still round-trip,
/// unresolved names just carry id `0`.
fn load_catalog(config: &AppConfig) -> Option<ServiceCatalog> {
    match load_services_catalog(&config.services_path) {
        Ok(catalog) => {
            tracing::debug!(
                services = catalog.len(),
                path = %config.services_path.display(),
                "loaded services catalog"
            );
            Some(catalog)
        }
        Err(e) => {
            tracing::warn!(
                path = %config.services_path.display(),
                error = %e,
                "services catalog unavailable; names will not be resolved"
            );
            None
        }
    }
}

fn print_catalog(catalog: &ServiceCatalog) {
    println!("{:<6}NAME", "ID");
    for service in catalog.services() {
        println!("{:<6}{}", service.id, service.name);
    }
}
