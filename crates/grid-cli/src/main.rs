//! Grid batch update CLI
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use grid_core::NewLease;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use cli::{Cli, Commands};
use handlers::UpdateRequest;

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grid_updates=info,grid=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = handlers::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::SetField {
            field,
            value,
            images,
        } => {
            handlers::handle_update(&config, UpdateRequest::set_field(&field, value), images)
                .await?;
        }
        Commands::Archive { unarchive, images } => {
            handlers::handle_update(&config, UpdateRequest::archive(!unarchive), images).await?;
        }
        Commands::LeaseCreate {
            access,
            start,
            end,
            notes,
            images,
        } => {
            let lease = NewLease {
                access: access.into(),
                start_date: start,
                end_date: end,
                notes,
            };
            handlers::handle_update(&config, UpdateRequest::create_lease(&lease)?, images).await?;
        }
        Commands::LeaseDelete { lease_id, images } => {
            handlers::handle_update(&config, UpdateRequest::delete_lease(&lease_id), images)
                .await?;
        }
        Commands::Config { full } => {
            handlers::handle_config(&config, full)?;
        }
    }

    Ok(())
}
