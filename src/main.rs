use std::{path::Path, sync::Arc};

use anyhow::Context;
use migration::MigratorTrait;
use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

use shelfsync::abs_client::AbsClient;
use shelfsync::config::Config;
use shelfsync::connections::{ConnectionSubsystem, CredentialStore};
use shelfsync::events::EventBus;
use shelfsync::sync::{BookmarkSubsystem, ProgressSubsystem};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (logs). Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!("{}=info,reqwest=warn,h2=warn", env!("CARGO_PKG_NAME"));
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting shelfsync");

    // Load environment variables from .env files
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load();
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!(e));
    }

    let db_conn = Database::connect(&config.db_connection_string)
        .await
        .with_context(|| "Failed to connect to database")?;
    migration::Migrator::up(&db_conn, None)
        .await
        .with_context(|| "Failed to run database migrations")?;
    let db = Arc::new(db_conn);

    let events = EventBus::new(config.event_capacity);
    let connections = ConnectionSubsystem::new(
        Arc::clone(&db),
        CredentialStore::keychain(),
        events.clone(),
    );
    let progress = ProgressSubsystem::new(Arc::clone(&db), events.clone());
    let bookmarks = BookmarkSubsystem::new(Arc::clone(&db), events.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing current phase");
                cancel.cancel();
            }
        });
    }

    connections.bootstrap().await?;
    connections.wait_for_connections().await;

    let known = connections.connections()?;
    if known.is_empty() {
        tracing::warn!("no stored connections, nothing to sync");
        return Ok(());
    }

    for credentials in known {
        if cancel.is_cancelled() {
            break;
        }
        let client = connections.client_for(&credentials)?;
        match sync_connection(
            &credentials.id,
            &client,
            &progress,
            &bookmarks,
            &cancel,
        )
        .await
        {
            Ok(()) => {
                let stamp = chrono::Utc::now().timestamp().to_string();
                let key = format!("lastSync.{}", credentials.id);
                shelfsync::storage::settings::set(&*db, &key, &stamp).await?;
            }
            Err(e) => {
                tracing::error!(connection_id = %credentials.id, error = %e, "sync failed");
            }
        }
    }
    Ok(())
}

async fn sync_connection(
    connection_id: &str,
    client: &AbsClient,
    progress: &ProgressSubsystem,
    bookmarks: &BookmarkSubsystem,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let me = client
        .get_me()
        .await
        .with_context(|| "Failed to fetch the user snapshot")?;

    let outcome = progress
        .sync(connection_id, me.media_progress, client, cancel)
        .await?;
    tracing::info!(
        connection_id,
        applied = outcome.applied_remote,
        created = outcome.created_local,
        removed = outcome.removed_local,
        pushed = outcome.pushed_updates + outcome.pushed_creations + outcome.pushed_deletions,
        "progress synchronized"
    );

    let outcome = bookmarks
        .sync(connection_id, me.bookmarks, client, cancel)
        .await?;
    tracing::info!(
        connection_id,
        applied = outcome.applied_remote,
        created = outcome.created_local,
        removed = outcome.removed_local,
        pushed = outcome.pushed_updates + outcome.pushed_creations + outcome.pushed_deletions,
        "bookmarks synchronized"
    );
    Ok(())
}
