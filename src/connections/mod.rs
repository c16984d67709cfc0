// Connection lifecycle: authorize against a server, keep the credentials in
// the keychain, and tear down local sync state when a connection goes away.

pub mod credentials;
pub mod strategy;

use std::sync::Arc;

use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::{Mutex, watch};

use crate::abs_client::AbsClient;
use crate::error::{Result, SyncError};
use crate::events::{Event, EventBus};
use crate::storage;

pub use credentials::{ConnectionCredentials, CredentialStore, connection_id};
pub use strategy::{AuthStrategy, AuthorizationOutcome, ProofKey};

/// Parameters for registering a new connection.
#[derive(Debug, Clone)]
pub struct AddConnection {
    pub host: String,
    pub strategy: AuthStrategy,
    pub headers: Vec<(String, String)>,
    pub client_identity: Option<String>,
}

pub struct ConnectionSubsystem {
    db: Arc<DatabaseConnection>,
    store: CredentialStore,
    events: EventBus,
    gate: Mutex<()>,
    ready: watch::Sender<bool>,
}

impl ConnectionSubsystem {
    pub fn new(db: Arc<DatabaseConnection>, store: CredentialStore, events: EventBus) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            db,
            store,
            events,
            gate: Mutex::new(()),
            ready,
        }
    }

    /// Load the stored connections once at startup and unblock everyone
    /// waiting in [`Self::wait_for_connections`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn bootstrap(&self) -> Result<usize> {
        let _guard = self.gate.lock().await;
        let known = self.store.list()?;
        tracing::info!(connections = known.len(), "connection store loaded");
        self.ready.send_replace(true);
        Ok(known.len())
    }

    /// Blocks until `bootstrap` has run. Callers that race startup use this
    /// instead of polling the store.
    pub async fn wait_for_connections(&self) {
        let mut rx = self.ready.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Probe the server, run the authorization exchange and persist the
    /// resulting credentials. Nothing is stored unless both steps succeed.
    #[tracing::instrument(level = "debug", skip(self, params), fields(host = %params.host))]
    pub async fn add_connection(&self, params: AddConnection) -> Result<ConnectionCredentials> {
        let client = AbsClient::new(&params.host)?.with_headers(params.headers.clone());
        let status = client.get_status().await?;
        ensure_initialized(&status, &params.host)?;

        let outcome = params.strategy.resolve(&client).await?;
        let _guard = self.gate.lock().await;
        let credentials = ConnectionCredentials {
            id: connection_id(&params.host, &outcome.username),
            host: params.host,
            username: outcome.username,
            access_token: outcome.access_token,
            refresh_token: outcome.refresh_token,
            headers: params.headers,
            client_identity: params.client_identity,
        };
        self.store.insert(&credentials)?;
        tracing::info!(connection_id = %credentials.id, username = %credentials.username, "connection added");
        self.events.publish(Event::ConnectionsChanged);
        Ok(credentials)
    }

    /// Drop a connection and every local sync record that belonged to it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn remove_connection(&self, id: &str) -> Result<()> {
        let _guard = self.gate.lock().await;
        if self.store.get(id)?.is_none() {
            return Err(SyncError::NotFound(id.to_string()));
        }
        self.store.remove(id)?;

        let txn = self.db.begin().await?;
        let progress = storage::progress::delete_for_connection(&txn, id).await?;
        let bookmarks = storage::bookmarks::delete_for_connection(&txn, id).await?;
        txn.commit().await?;
        tracing::info!(connection_id = %id, progress, bookmarks, "connection removed");

        self.events.publish(Event::ConnectionsChanged);
        Ok(())
    }

    /// Remove every connection and all local sync state.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.gate.lock().await;
        let known = self.store.list()?;
        self.store.clear()?;

        let txn = self.db.begin().await?;
        for credentials in &known {
            storage::progress::delete_for_connection(&txn, &credentials.id).await?;
            storage::bookmarks::delete_for_connection(&txn, &credentials.id).await?;
        }
        txn.commit().await?;
        tracing::info!(connections = known.len(), "connection store reset");

        self.events.publish(Event::ConnectionsChanged);
        Ok(())
    }

    pub fn connections(&self) -> Result<Vec<ConnectionCredentials>> {
        self.store.list()
    }

    pub fn client_for(&self, credentials: &ConnectionCredentials) -> Result<AbsClient> {
        Ok(AbsClient::new(&credentials.host)?
            .with_token(&credentials.access_token)
            .with_headers(credentials.headers.clone()))
    }
}

/// A server only qualifies when the probe carries an explicit initialized
/// flag set to true; a missing flag is treated as uninitialized.
fn ensure_initialized(status: &crate::abs_client::StatusResponse, host: &str) -> Result<()> {
    if status.is_init == Some(true) {
        Ok(())
    } else {
        Err(SyncError::ServerNotInitialized(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::credentials::tests::{MemoryBackend, credentials};
    use crate::domain::models::ItemIdentifier;
    use chrono::Utc;
    use entities::progress::SyncStatus;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn subsystem() -> ConnectionSubsystem {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        ConnectionSubsystem::new(
            Arc::new(db),
            CredentialStore::new(Box::new(MemoryBackend::default())),
            EventBus::new(16),
        )
    }

    fn progress_row(connection_id: &str) -> entities::progress::Model {
        entities::progress::Model {
            id: "p1".into(),
            connection_id: connection_id.into(),
            primary_id: "item".into(),
            grouping_id: None,
            progress: 0.5,
            duration: None,
            current_time: 10.0,
            started_at: None,
            last_update: Utc::now(),
            finished_at: None,
            status: SyncStatus::Synchronized,
        }
    }

    #[tokio::test]
    async fn bootstrap_unblocks_waiters() {
        let sub = Arc::new(subsystem().await);
        let waiter = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.wait_for_connections().await })
        };
        sub.bootstrap().await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn remove_connection_purges_local_state() {
        let sub = subsystem().await;
        let creds = credentials("https://abs.example", "alice");
        sub.store.insert(&creds).unwrap();
        storage::progress::insert(&*sub.db, progress_row(&creds.id))
            .await
            .unwrap();

        sub.remove_connection(&creds.id).await.unwrap();

        assert!(sub.connections().unwrap().is_empty());
        let item = ItemIdentifier::audiobook(creds.id.clone(), "item");
        assert!(
            storage::progress::find_active(&*sub.db, &item)
                .await
                .unwrap()
                .is_none()
        );

        let err = sub.remove_connection(&creds.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn status_without_initialized_flag_is_rejected() {
        let status = crate::abs_client::StatusResponse {
            app: Some("audiobookshelf".into()),
            server_version: Some("2.17.0".into()),
            is_init: None,
            auth_methods: Vec::new(),
        };
        let err = ensure_initialized(&status, "https://abs.example").unwrap_err();
        assert!(matches!(err, SyncError::ServerNotInitialized(_)));

        let ready = crate::abs_client::StatusResponse {
            is_init: Some(true),
            ..status
        };
        assert!(ensure_initialized(&ready, "https://abs.example").is_ok());
    }

    #[tokio::test]
    async fn add_connection_with_unreachable_host_persists_nothing() {
        let sub = subsystem().await;
        let err = sub
            .add_connection(AddConnection {
                host: "http://127.0.0.1:1".into(),
                strategy: AuthStrategy::UsernamePassword {
                    username: "alice".into(),
                    password: "secret".into(),
                },
                headers: Vec::new(),
                client_identity: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(sub.connections().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_every_connection() {
        let sub = subsystem().await;
        let alice = credentials("https://abs.example", "alice");
        let bob = credentials("https://abs.example", "bob");
        sub.store.insert(&alice).unwrap();
        sub.store.insert(&bob).unwrap();
        storage::progress::insert(&*sub.db, progress_row(&alice.id))
            .await
            .unwrap();

        sub.reset().await.unwrap();
        assert!(sub.connections().unwrap().is_empty());
        assert!(
            storage::progress::all_for_connection(&*sub.db, &alice.id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
