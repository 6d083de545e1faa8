//! Location command handlers for the CLI.
//!
//! Every command loads the provider's current locations into a fresh
//! editing session, applies one change through the reconciliation client,
//! and prints the reconciled result.

mod fields;

use std::sync::Arc;

use clap::{Args, Subcommand};
use provdir_core::AppConfig;
use provdir_locations::{
    CredentialProvider, EditingSession, Location, LocationKey, LocationStore,
    ReconciliationClient, ServiceNormalizer, WriteOutcome,
};

use fields::{LocationFields, UpdateFields};

/// Sub-commands available under `locations`.
#[derive(Debug, Subcommand)]
pub enum LocationCommands {
    /// Show the provider's locations in display order
    List,
    /// Add a location
    Add {
        /// Display name of the new location
        name: String,
        #[command(flatten)]
        fields: LocationFields,
    },
    /// Edit fields of a saved location
    Update {
        /// Location id
        id: i64,
        #[command(flatten)]
        fields: UpdateFields,
    },
    /// Drop a location from the provider's set
    Remove {
        /// Location id
        id: i64,
    },
    /// Delete a location through the single-record endpoint
    Delete {
        /// Location id
        id: i64,
    },
    /// Make a saved location the primary one
    SetPrimary {
        /// Location id
        id: i64,
    },
    /// Move a location one place earlier
    MoveUp {
        /// Location id
        id: i64,
    },
    /// Move a location one place later
    MoveDown {
        /// Location id
        id: i64,
    },
    /// Apply a new display order
    Reorder(ReorderArgs),
}

#[derive(Debug, Args)]
pub struct ReorderArgs {
    /// Every location id, in the new order
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<i64>,
}

/// Runs one location command for `provider_id`.
///
/// # Errors
///
/// Returns an error if the client cannot be built, the initial fetch fails,
/// or the requested change is rejected locally or by the remote service.
pub(crate) async fn run(
    config: &AppConfig,
    provider_id: i64,
    credentials: Arc<dyn CredentialProvider>,
    normalizer: ServiceNormalizer,
    command: LocationCommands,
) -> anyhow::Result<()> {
    let client = ReconciliationClient::from_config(config, provider_id, credentials, normalizer)?;
    let session = EditingSession::new();
    let store = session.store();

    client.refresh(store).await?;

    let outcome = match command {
        LocationCommands::List => {
            session.with_store(|store| print_locations(store));
            return Ok(());
        }
        LocationCommands::Add { name, fields } => {
            let draft = fields.into_draft(name, client.normalizer())?;
            client.add_location(store, draft).await?
        }
        LocationCommands::Update { id, fields } => {
            let patch = fields.into_patch(client.normalizer())?;
            client
                .update_location(store, LocationKey::Persisted(id), patch)
                .await?
        }
        LocationCommands::Remove { id } => {
            client
                .remove_location(store, LocationKey::Persisted(id))
                .await?
        }
        LocationCommands::Delete { id } => {
            client
                .delete_location(store, LocationKey::Persisted(id))
                .await?
        }
        LocationCommands::SetPrimary { id } => {
            client.set_primary(store, LocationKey::Persisted(id)).await?
        }
        LocationCommands::MoveUp { id } => client.move_up(store, LocationKey::Persisted(id)).await?,
        LocationCommands::MoveDown { id } => {
            client.move_down(store, LocationKey::Persisted(id)).await?
        }
        LocationCommands::Reorder(args) => {
            let order = args.ids.into_iter().map(LocationKey::Persisted).collect();
            client.reorder(store, order).await?
        }
    };

    report(&outcome);
    session.with_store(|store| print_locations(store));
    Ok(())
}

fn report(outcome: &WriteOutcome) {
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }
    if outcome.refetched {
        println!("server state re-read after the write");
    }
}

fn print_locations(store: &LocationStore) {
    if store.is_empty() {
        println!("no locations");
        return;
    }

    println!(
        "{:<3}{:<8}{:<28}{:<22}{:<7}SERVICES",
        "", "ID", "NAME", "CITY", "STATE"
    );
    let primary = store.primary_location_id();
    for location in store.locations() {
        let marker = if location.id.is_some() && location.id == primary {
            "*"
        } else {
            ""
        };
        println!(
            "{:<3}{:<8}{:<28}{:<22}{:<7}{}",
            marker,
            location
                .id
                .map_or_else(|| "new".to_string(), |id| id.to_string()),
            fmt_opt(location.name.as_deref()),
            fmt_opt(location.city.as_deref()),
            fmt_opt(location.state.as_deref()),
            services_summary(location),
        );
    }
}

fn services_summary(location: &Location) -> String {
    if location.services.is_empty() {
        return "\u{2014}".to_string();
    }
    location
        .services
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format an optional field for display, returning `"—"` when `None`.
fn fmt_opt(value: Option<&str>) -> String {
    value.map_or_else(|| "\u{2014}".to_string(), ToString::to_string)
}
