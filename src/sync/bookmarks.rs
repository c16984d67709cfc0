use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use entities::bookmark::{self, BookmarkStatus};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::abs_client::AudioBookmarkDto;
use crate::domain::mapping;
use crate::error::{Result, SyncError};
use crate::events::{Event, EventBus};
use crate::storage;
use crate::sync::{BookmarkApi, SyncOutcome};

/// Local and remote mutations one bookmark reconciliation pass decided on.
/// Bookmarks are keyed by (item, whole second), so there is no id adoption.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct BookmarkPlan {
    pub overwrite_local: Vec<bookmark::Model>,
    pub insert_local: Vec<bookmark::Model>,
    pub delete_local: Vec<(String, i64)>,
    pub push_creations: Vec<bookmark::Model>,
    pub push_updates: Vec<bookmark::Model>,
    pub push_deletions: Vec<(String, i64)>,
}

pub(crate) fn plan(
    connection_id: &str,
    locals: &[bookmark::Model],
    mut remotes: Vec<AudioBookmarkDto>,
) -> BookmarkPlan {
    let mut out = BookmarkPlan::default();

    for local in locals {
        let matched = remotes
            .iter()
            .position(|dto| dto.library_item_id == local.primary_id && dto.time == local.time);
        match matched {
            Some(idx) => {
                let dto = remotes.swap_remove(idx);
                match local.status {
                    // stays soft-deleted locally; the row is dropped only once
                    // the remote deletion succeeds
                    BookmarkStatus::Deleted => {
                        out.push_deletions.push((local.primary_id.clone(), local.time));
                    }
                    BookmarkStatus::PendingUpdate => out.push_updates.push(local.clone()),
                    // the server grew a bookmark at the same position while ours
                    // was waiting; the local note wins
                    BookmarkStatus::PendingCreation => {
                        tracing::debug!(
                            primary_id = %local.primary_id,
                            time = local.time,
                            "pending creation collides with a remote bookmark, keeping the local note"
                        );
                        out.push_updates.push(local.clone());
                    }
                    BookmarkStatus::Synced => {
                        if dto.title != local.note {
                            out.overwrite_local
                                .push(mapping::remote_to_bookmark(connection_id, &dto));
                        }
                    }
                }
            }
            None => match local.status {
                BookmarkStatus::PendingCreation => out.push_creations.push(local.clone()),
                // the remote copy vanished before the edit landed, so the note
                // is re-pushed as a fresh bookmark
                BookmarkStatus::PendingUpdate => out.push_creations.push(local.clone()),
                BookmarkStatus::Deleted => {
                    out.delete_local.push((local.primary_id.clone(), local.time));
                }
                // synced and gone remotely means deleted on the server
                BookmarkStatus::Synced => {
                    out.delete_local.push((local.primary_id.clone(), local.time));
                }
            },
        }
    }

    for dto in &remotes {
        out.insert_local
            .push(mapping::remote_to_bookmark(connection_id, dto));
    }
    out
}

/// Serialized owner of the bookmarks table, mirroring the progress subsystem.
pub struct BookmarkSubsystem {
    db: Arc<DatabaseConnection>,
    events: EventBus,
    gate: Mutex<()>,
}

impl BookmarkSubsystem {
    pub fn new(db: Arc<DatabaseConnection>, events: EventBus) -> Self {
        Self {
            db,
            events,
            gate: Mutex::new(()),
        }
    }

    /// Record a new bookmark at a whole-second position. A live bookmark at
    /// the same position is an error; a deleted one is resurrected with the
    /// new note.
    pub async fn create(
        &self,
        connection_id: &str,
        primary_id: &str,
        time: i64,
        note: &str,
    ) -> Result<bookmark::Model> {
        let _guard = self.gate.lock().await;
        let row = bookmark::Model {
            connection_id: connection_id.to_string(),
            primary_id: primary_id.to_string(),
            time,
            note: note.to_string(),
            created_at: Utc::now(),
            status: BookmarkStatus::PendingCreation,
        };
        let txn = self.db.begin().await?;
        match storage::bookmarks::find(&txn, connection_id, primary_id, time).await? {
            Some(existing) if existing.status != BookmarkStatus::Deleted => {
                return Err(SyncError::AlreadyExists(format!(
                    "{primary_id}@{time}"
                )));
            }
            Some(_) => {
                tracing::warn!(
                    primary_id,
                    time,
                    "new bookmark replaces a pending deletion at the same position"
                );
                storage::bookmarks::replace(&txn, row.clone()).await?;
            }
            None => storage::bookmarks::insert(&txn, row.clone()).await?,
        }
        txn.commit().await?;
        self.publish_changed(connection_id, primary_id);
        Ok(row)
    }

    pub async fn update_note(
        &self,
        connection_id: &str,
        primary_id: &str,
        time: i64,
        note: &str,
    ) -> Result<bookmark::Model> {
        let _guard = self.gate.lock().await;
        let txn = self.db.begin().await?;
        let mut row = storage::bookmarks::find(&txn, connection_id, primary_id, time)
            .await?
            .filter(|row| row.status != BookmarkStatus::Deleted)
            .ok_or_else(|| SyncError::NotFound(format!("{primary_id}@{time}")))?;
        row.note = note.to_string();
        // a creation the server never saw stays a creation
        if row.status != BookmarkStatus::PendingCreation {
            row.status = BookmarkStatus::PendingUpdate;
        }
        storage::bookmarks::replace(&txn, row.clone()).await?;
        txn.commit().await?;
        self.publish_changed(connection_id, primary_id);
        Ok(row)
    }

    /// Flag a bookmark for deletion. One the server never saw is dropped
    /// outright.
    pub async fn remove(&self, connection_id: &str, primary_id: &str, time: i64) -> Result<()> {
        let _guard = self.gate.lock().await;
        let txn = self.db.begin().await?;
        let mut row = storage::bookmarks::find(&txn, connection_id, primary_id, time)
            .await?
            .filter(|row| row.status != BookmarkStatus::Deleted)
            .ok_or_else(|| SyncError::NotFound(format!("{primary_id}@{time}")))?;
        if row.status == BookmarkStatus::PendingCreation {
            storage::bookmarks::delete(&txn, connection_id, primary_id, time).await?;
        } else {
            row.status = BookmarkStatus::Deleted;
            storage::bookmarks::replace(&txn, row).await?;
        }
        txn.commit().await?;
        self.publish_changed(connection_id, primary_id);
        Ok(())
    }

    /// Live bookmarks for one item, ordered by position.
    pub async fn list(&self, connection_id: &str, primary_id: &str) -> Result<Vec<bookmark::Model>> {
        let mut rows = storage::bookmarks::all_for_connection(&*self.db, connection_id)
            .await?
            .into_iter()
            .filter(|row| row.primary_id == primary_id && row.status != BookmarkStatus::Deleted)
            .collect::<Vec<_>>();
        rows.sort_by_key(|row| row.time);
        Ok(rows)
    }

    /// Merge a remote bookmark snapshot, then dispatch pending mutations in
    /// deletion, update, creation order. Calls are attempted independently
    /// and the first error propagates once all were tried.
    #[tracing::instrument(level = "debug", skip(self, remote, api, cancel), fields(payloads = remote.len()))]
    pub async fn sync(
        &self,
        connection_id: &str,
        remote: Vec<AudioBookmarkDto>,
        api: &dyn BookmarkApi,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let _guard = self.gate.try_lock().map_err(|_| SyncError::Busy)?;

        let txn = self.db.begin().await?;
        let locals = storage::bookmarks::all_for_connection(&txn, connection_id).await?;
        let plan = plan(connection_id, &locals, remote);

        for (primary_id, time) in &plan.delete_local {
            storage::bookmarks::delete(&txn, connection_id, primary_id, *time).await?;
        }
        for row in &plan.overwrite_local {
            storage::bookmarks::replace(&txn, row.clone()).await?;
        }
        for row in &plan.insert_local {
            storage::bookmarks::insert(&txn, row.clone()).await?;
        }
        txn.commit().await?;

        let mut outcome = SyncOutcome {
            applied_remote: plan.overwrite_local.len(),
            created_local: plan.insert_local.len(),
            removed_local: plan.delete_local.len(),
            ..Default::default()
        };
        let mut touched: HashSet<&str> = HashSet::new();
        for (primary_id, _) in &plan.delete_local {
            touched.insert(primary_id);
        }
        for row in plan.overwrite_local.iter().chain(&plan.insert_local) {
            touched.insert(&row.primary_id);
        }
        for primary_id in touched {
            self.publish_changed(connection_id, primary_id);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut first_err: Option<SyncError> = None;
        for (primary_id, time) in &plan.push_deletions {
            match api.delete_bookmark(primary_id, *time).await {
                Ok(()) => {
                    storage::bookmarks::delete(&*self.db, connection_id, primary_id, *time).await?;
                    outcome.pushed_deletions += 1;
                    outcome.removed_local += 1;
                }
                Err(e) => {
                    tracing::warn!(primary_id, time, error = %e, "remote bookmark deletion failed, keeping the local marker");
                    first_err.get_or_insert(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(first_err.unwrap_or(SyncError::Cancelled));
        }

        let mut synced: Vec<(String, i64)> = Vec::new();
        for row in &plan.push_updates {
            match api.update_bookmark(&row.primary_id, row.time, &row.note).await {
                Ok(_) => {
                    synced.push((row.primary_id.clone(), row.time));
                    outcome.pushed_updates += 1;
                }
                Err(e) => {
                    tracing::warn!(primary_id = %row.primary_id, time = row.time, error = %e, "remote bookmark update failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        if cancel.is_cancelled() {
            storage::bookmarks::set_status(&*self.db, connection_id, &synced, BookmarkStatus::Synced)
                .await?;
            return Err(first_err.unwrap_or(SyncError::Cancelled));
        }

        for row in &plan.push_creations {
            match api.create_bookmark(&row.primary_id, row.time, &row.note).await {
                Ok(_) => {
                    synced.push((row.primary_id.clone(), row.time));
                    outcome.pushed_creations += 1;
                }
                Err(e) => {
                    tracing::warn!(primary_id = %row.primary_id, time = row.time, error = %e, "remote bookmark creation failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        storage::bookmarks::set_status(&*self.db, connection_id, &synced, BookmarkStatus::Synced)
            .await?;

        match first_err {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    fn publish_changed(&self, connection_id: &str, primary_id: &str) {
        self.events.publish(Event::BookmarksChanged {
            connection_id: connection_id.to_string(),
            primary_id: primary_id.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::Mutex as StdMutex;

    fn local(primary: &str, time: i64, note: &str, status: BookmarkStatus) -> bookmark::Model {
        bookmark::Model {
            connection_id: "c1".into(),
            primary_id: primary.into(),
            time,
            note: note.into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            status,
        }
    }

    fn remote(primary: &str, time: i64, title: &str) -> AudioBookmarkDto {
        AudioBookmarkDto {
            library_item_id: primary.into(),
            title: title.into(),
            time,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn deleted_with_remote_counterpart_stays_until_remote_confirms() {
        let locals = vec![local("item", 120, "note", BookmarkStatus::Deleted)];
        let plan = plan("c1", &locals, vec![remote("item", 120, "note")]);
        assert_eq!(plan.push_deletions, vec![("item".to_string(), 120)]);
        // the row is only dropped after the remote deletion succeeds
        assert!(plan.delete_local.is_empty());
    }

    #[test]
    fn colliding_pending_creation_keeps_local_note() {
        let locals = vec![local("item", 120, "mine", BookmarkStatus::PendingCreation)];
        let plan = plan("c1", &locals, vec![remote("item", 120, "theirs")]);
        assert_eq!(plan.push_updates.len(), 1);
        assert_eq!(plan.push_updates[0].note, "mine");
        assert!(plan.overwrite_local.is_empty());
        assert!(plan.insert_local.is_empty());
    }

    #[test]
    fn synced_note_drift_adopts_remote() {
        let locals = vec![local("item", 120, "old", BookmarkStatus::Synced)];
        let plan = plan("c1", &locals, vec![remote("item", 120, "new")]);
        assert_eq!(plan.overwrite_local.len(), 1);
        assert_eq!(plan.overwrite_local[0].note, "new");
    }

    #[test]
    fn synced_without_remote_is_dropped() {
        let locals = vec![local("item", 120, "note", BookmarkStatus::Synced)];
        let plan = plan("c1", &locals, vec![]);
        assert_eq!(plan.delete_local, vec![("item".to_string(), 120)]);
        assert!(plan.push_creations.is_empty());
    }

    #[test]
    fn orphaned_pending_update_becomes_a_creation() {
        let locals = vec![local("item", 120, "edited", BookmarkStatus::PendingUpdate)];
        let plan = plan("c1", &locals, vec![]);
        assert_eq!(plan.push_creations.len(), 1);
        assert_eq!(plan.push_creations[0].note, "edited");
    }

    #[test]
    fn remote_only_bookmarks_land_locally_as_synced() {
        let plan = plan("c1", &[], vec![remote("item", 120, "note")]);
        assert_eq!(plan.insert_local.len(), 1);
        assert_eq!(plan.insert_local[0].status, BookmarkStatus::Synced);
    }

    #[derive(Default)]
    struct MockApi {
        calls: StdMutex<Vec<String>>,
        fail_deletions: bool,
    }

    #[async_trait::async_trait]
    impl BookmarkApi for MockApi {
        async fn create_bookmark(
            &self,
            library_item_id: &str,
            time: i64,
            note: &str,
        ) -> Result<AudioBookmarkDto> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {library_item_id}@{time}"));
            Ok(remote(library_item_id, time, note))
        }

        async fn update_bookmark(
            &self,
            library_item_id: &str,
            time: i64,
            note: &str,
        ) -> Result<AudioBookmarkDto> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {library_item_id}@{time}"));
            Ok(remote(library_item_id, time, note))
        }

        async fn delete_bookmark(&self, library_item_id: &str, time: i64) -> Result<()> {
            if self.fail_deletions {
                return Err(SyncError::Unauthorized);
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete {library_item_id}@{time}"));
            Ok(())
        }
    }

    async fn subsystem() -> BookmarkSubsystem {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        BookmarkSubsystem::new(Arc::new(db), EventBus::new(16))
    }

    #[tokio::test]
    async fn create_rejects_live_duplicates_and_resurrects_deleted_ones() {
        let sub = subsystem().await;
        sub.create("c1", "item", 120, "first").await.unwrap();

        let err = sub.create("c1", "item", 120, "second").await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));

        // direct deletion path is only taken for synced rows
        storage::bookmarks::set_status(
            &*sub.db,
            "c1",
            &[("item".to_string(), 120)],
            BookmarkStatus::Deleted,
        )
        .await
        .unwrap();
        let row = sub.create("c1", "item", 120, "second").await.unwrap();
        assert_eq!(row.status, BookmarkStatus::PendingCreation);
        assert_eq!(row.note, "second");
    }

    #[tokio::test]
    async fn removing_a_pending_creation_drops_the_row() {
        let sub = subsystem().await;
        sub.create("c1", "item", 120, "note").await.unwrap();
        sub.remove("c1", "item", 120).await.unwrap();
        assert!(sub.list("c1", "item").await.unwrap().is_empty());
        assert!(
            storage::bookmarks::find(&*sub.db, "c1", "item", 120)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sync_flushes_in_deletion_update_creation_order() {
        let sub = subsystem().await;
        storage::bookmarks::insert(&*sub.db, local("item", 60, "gone", BookmarkStatus::Deleted))
            .await
            .unwrap();
        storage::bookmarks::insert(
            &*sub.db,
            local("item", 120, "edited", BookmarkStatus::PendingUpdate),
        )
        .await
        .unwrap();
        storage::bookmarks::insert(
            &*sub.db,
            local("item", 180, "fresh", BookmarkStatus::PendingCreation),
        )
        .await
        .unwrap();

        let api = MockApi::default();
        let cancel = CancellationToken::new();
        let outcome = sub
            .sync(
                "c1",
                vec![remote("item", 60, "gone"), remote("item", 120, "stale")],
                &api,
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome.pushed_deletions, 1);
        assert_eq!(outcome.pushed_updates, 1);
        assert_eq!(outcome.pushed_creations, 1);
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec![
                "delete item@60".to_string(),
                "update item@120".to_string(),
                "create item@180".to_string(),
            ]
        );

        let rows = sub.list("c1", "item").await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.status, BookmarkStatus::Synced);
        }
    }

    #[tokio::test]
    async fn failed_remote_deletion_keeps_the_local_marker() {
        let sub = subsystem().await;
        storage::bookmarks::insert(&*sub.db, local("item", 60, "gone", BookmarkStatus::Deleted))
            .await
            .unwrap();

        let api = MockApi {
            fail_deletions: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let result = sub
            .sync("c1", vec![remote("item", 60, "gone")], &api, &cancel)
            .await;

        assert!(matches!(result, Err(SyncError::Unauthorized)));
        let row = storage::bookmarks::find(&*sub.db, "c1", "item", 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, BookmarkStatus::Deleted);

        // the next pass against a working server drains the marker
        let api = MockApi::default();
        sub.sync("c1", vec![remote("item", 60, "gone")], &api, &cancel)
            .await
            .unwrap();
        assert!(
            storage::bookmarks::find(&*sub.db, "c1", "item", 60)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sync_adopts_remote_only_bookmarks() {
        let sub = subsystem().await;
        let api = MockApi::default();
        let cancel = CancellationToken::new();
        let outcome = sub
            .sync("c1", vec![remote("item", 300, "server")], &api, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.created_local, 1);
        assert!(api.calls.lock().unwrap().is_empty());

        let rows = sub.list("c1", "item").await.unwrap();
        assert_eq!(rows[0].note, "server");
        assert_eq!(rows[0].status, BookmarkStatus::Synced);
    }
}
