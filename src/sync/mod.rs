// Local/remote reconciliation. Each subsystem serializes its own mutations;
// the local transaction always commits before any remote call is dispatched.

pub mod bookmarks;
pub mod progress;

use crate::abs_client::{AudioBookmarkDto, ProgressUpdateDto};
use crate::error::Result;

pub use bookmarks::BookmarkSubsystem;
pub use progress::ProgressSubsystem;

/// Remote mutations the progress reconciler dispatches after its local
/// transaction commits. `AbsClient` is the production implementation.
#[async_trait::async_trait]
pub trait ProgressApi: Send + Sync {
    async fn batch_update_progress(&self, updates: &[ProgressUpdateDto]) -> Result<()>;
    async fn delete_progress(&self, id: &str) -> Result<()>;
}

/// Remote mutations the bookmark reconciler dispatches.
#[async_trait::async_trait]
pub trait BookmarkApi: Send + Sync {
    async fn create_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto>;
    async fn update_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto>;
    async fn delete_bookmark(&self, library_item_id: &str, time: i64) -> Result<()>;
}

/// Counters describing what one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Local rows overwritten with newer remote values.
    pub applied_remote: usize,
    /// Local rows created from remote-only payloads.
    pub created_local: usize,
    /// Local rows removed (tombstones and server-side deletions).
    pub removed_local: usize,
    /// Local rows pushed to the server as updates.
    pub pushed_updates: usize,
    /// Local rows pushed to the server as creations.
    pub pushed_creations: usize,
    /// Remote deletions issued.
    pub pushed_deletions: usize,
}
