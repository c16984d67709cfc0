use thiserror::Error;

use crate::domain::models::ItemKind;

/// Error surface of the sync engine.
///
/// Reconciliation entry points only return after local transactional
/// consistency is ensured; a propagated `Network` error means remote
/// communication failed, not that on-disk state is inconsistent.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("another operation is already running on this subsystem")]
    Busy,
    #[error("operation is not supported for item kind {0}")]
    UnsupportedItemType(ItemKind),
    #[error("server at {0} is not initialized")]
    ServerNotInitialized(String),
    #[error("failed to store credentials: {0}")]
    KeychainInsert(String),
    #[error("failed to read credentials: {0}")]
    KeychainRetrieve(String),
    #[error("malformed server response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("server rejected the provided credentials")]
    Unauthorized,
    #[error("sync cancelled")]
    Cancelled,
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
}

pub type Result<T> = std::result::Result<T, SyncError>;
