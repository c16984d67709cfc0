use std::sync::Arc;

use chrono::Utc;
use entities::progress::{self, SyncStatus};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::abs_client::MediaProgressDto;
use crate::domain::{mapping, models::ItemIdentifier};
use crate::error::{Result, SyncError};
use crate::events::{Event, EventBus};
use crate::storage;
use crate::sync::{ProgressApi, SyncOutcome};

/// Everything one reconciliation pass decided to do, computed up front so the
/// local transaction stays free of network I/O.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ProgressPlan {
    /// (previous row id, replacement row): remote won, local adopts it.
    pub overwrite_local: Vec<(String, progress::Model)>,
    pub insert_local: Vec<progress::Model>,
    pub delete_local: Vec<String>,
    pub push_updates: Vec<progress::Model>,
    pub push_creations: Vec<progress::Model>,
    pub push_deletions: Vec<String>,
}

/// Diff local records against a remote snapshot. Matched payloads are
/// consumed from the candidate list; whatever remains is remote-only.
pub(crate) fn plan(
    connection_id: &str,
    locals: &[progress::Model],
    mut remotes: Vec<MediaProgressDto>,
) -> ProgressPlan {
    let mut out = ProgressPlan::default();

    for local in locals {
        let matched = remotes.iter().position(|dto| {
            mapping::remote_primary_id(dto) == local.primary_id
                && mapping::remote_grouping_id(dto) == local.grouping_id.as_deref()
        });
        match matched {
            Some(idx) => {
                let dto = remotes.swap_remove(idx);
                if local.status == SyncStatus::Tombstone {
                    out.push_deletions.push(dto.id.clone());
                    out.delete_local.push(local.id.clone());
                    continue;
                }
                let delta = mapping::delta_seconds(dto.last_update, &local.last_update);
                if delta > 0 {
                    out.overwrite_local
                        .push((local.id.clone(), mapping::apply_remote_progress(local, &dto)));
                } else if delta < 0 {
                    out.push_updates.push(local.clone());
                } else if local.status != SyncStatus::Synchronized {
                    // tie: remote is authoritative, the local copy converges
                    out.overwrite_local
                        .push((local.id.clone(), mapping::apply_remote_progress(local, &dto)));
                }
            }
            None => match local.status {
                SyncStatus::Desynchronized => out.push_creations.push(local.clone()),
                // the server never saw this record, nothing to delete remotely
                SyncStatus::Tombstone => out.delete_local.push(local.id.clone()),
                // once synchronized the server owns the record; absence means deleted
                SyncStatus::Synchronized => out.delete_local.push(local.id.clone()),
            },
        }
    }

    for dto in &remotes {
        out.insert_local
            .push(mapping::remote_to_progress(connection_id, dto));
    }
    out
}

/// Serialized owner of the progress table. Only one mutation runs at a time;
/// `sync` additionally fails fast with `Busy` instead of queueing.
pub struct ProgressSubsystem {
    db: Arc<DatabaseConnection>,
    events: EventBus,
    gate: Mutex<()>,
}

impl ProgressSubsystem {
    pub fn new(db: Arc<DatabaseConnection>, events: EventBus) -> Self {
        Self {
            db,
            events,
            gate: Mutex::new(()),
        }
    }

    /// Merge a remote snapshot for one connection into the local store, then
    /// dispatch the pending remote mutations.
    ///
    /// The local transaction commits before any network call; an error from a
    /// remote batch propagates only after every batch was attempted, so a
    /// partial server failure never leaves the local store inconsistent.
    #[tracing::instrument(level = "debug", skip(self, remote, api, cancel), fields(payloads = remote.len()))]
    pub async fn sync(
        &self,
        connection_id: &str,
        remote: Vec<MediaProgressDto>,
        api: &dyn ProgressApi,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let _guard = self.gate.try_lock().map_err(|_| SyncError::Busy)?;

        let txn = self.db.begin().await?;
        let locals = storage::progress::all_for_connection(&txn, connection_id).await?;
        let plan = plan(connection_id, &locals, remote);

        storage::progress::delete_by_ids(&txn, &plan.delete_local).await?;
        for (previous_id, row) in &plan.overwrite_local {
            if *previous_id == row.id {
                storage::progress::replace(&txn, row.clone()).await?;
            } else {
                storage::progress::delete_by_ids(&txn, std::slice::from_ref(previous_id)).await?;
                storage::progress::insert(&txn, row.clone()).await?;
            }
        }
        for row in &plan.insert_local {
            storage::progress::insert(&txn, row.clone()).await?;
        }
        storage::progress::prune_duplicates(&txn, connection_id).await?;
        txn.commit().await?;

        let mut outcome = SyncOutcome {
            applied_remote: plan.overwrite_local.len(),
            created_local: plan.insert_local.len(),
            removed_local: plan.delete_local.len(),
            ..Default::default()
        };
        for (_, row) in &plan.overwrite_local {
            self.publish_updated(row);
        }
        for row in &plan.insert_local {
            self.publish_updated(row);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Deletions go out first: they carry less risk than creations under
        // duplicate-avoidance pressure. Batches are attempted independently.
        let mut first_err: Option<SyncError> = None;
        for id in &plan.push_deletions {
            match api.delete_progress(id).await {
                Ok(()) => outcome.pushed_deletions += 1,
                Err(e) => {
                    tracing::warn!(progress_id = %id, error = %e, "remote progress deletion failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(first_err.unwrap_or(SyncError::Cancelled));
        }

        if !plan.push_updates.is_empty() {
            let updates: Vec<_> = plan
                .push_updates
                .iter()
                .map(mapping::progress_to_update)
                .collect();
            match api.batch_update_progress(&updates).await {
                Ok(()) => {
                    let ids: Vec<String> =
                        plan.push_updates.iter().map(|r| r.id.clone()).collect();
                    storage::progress::mark_synchronized(&*self.db, &ids).await?;
                    outcome.pushed_updates = ids.len();
                }
                Err(e) => {
                    tracing::warn!(count = plan.push_updates.len(), error = %e, "remote progress update batch failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(first_err.unwrap_or(SyncError::Cancelled));
        }

        if !plan.push_creations.is_empty() {
            let creations: Vec<_> = plan
                .push_creations
                .iter()
                .map(mapping::progress_to_update)
                .collect();
            match api.batch_update_progress(&creations).await {
                Ok(()) => {
                    let ids: Vec<String> =
                        plan.push_creations.iter().map(|r| r.id.clone()).collect();
                    storage::progress::mark_synchronized(&*self.db, &ids).await?;
                    outcome.pushed_creations = ids.len();
                }
                Err(e) => {
                    tracing::warn!(count = plan.push_creations.len(), error = %e, "remote progress creation batch failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    pub async fn get(&self, item: &ItemIdentifier) -> Result<Option<progress::Model>> {
        ensure_playable(item)?;
        storage::progress::find_active(&*self.db, item).await
    }

    /// First playback of an item creates its record; subsequent starts only
    /// refresh the timestamps.
    pub async fn start_playback(&self, item: &ItemIdentifier) -> Result<progress::Model> {
        ensure_playable(item)?;
        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let txn = self.db.begin().await?;
        let row = match storage::progress::find_active(&txn, item).await? {
            Some(mut existing) => {
                existing.started_at.get_or_insert(now);
                existing.last_update = now;
                existing.status = SyncStatus::Desynchronized;
                storage::progress::replace(&txn, existing.clone()).await?;
                existing
            }
            None => {
                let row = progress::Model {
                    id: Uuid::new_v4().to_string(),
                    connection_id: item.connection_id.clone(),
                    primary_id: item.primary_id.clone(),
                    grouping_id: item.grouping_id.clone(),
                    progress: 0.0,
                    duration: None,
                    current_time: 0.0,
                    started_at: Some(now),
                    last_update: now,
                    finished_at: None,
                    status: SyncStatus::Desynchronized,
                };
                storage::progress::insert(&txn, row.clone()).await?;
                row
            }
        };
        txn.commit().await?;
        self.publish_updated(&row);
        Ok(row)
    }

    /// Playback milestone (pause/resume boundary or periodic tick).
    pub async fn update_position(
        &self,
        item: &ItemIdentifier,
        current_time: f64,
        duration: Option<f64>,
    ) -> Result<progress::Model> {
        ensure_playable(item)?;
        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let txn = self.db.begin().await?;
        let existing = storage::progress::find_active(&txn, item).await?;
        let is_new = existing.is_none();
        let mut row = existing.unwrap_or_else(|| progress::Model {
            id: Uuid::new_v4().to_string(),
            connection_id: item.connection_id.clone(),
            primary_id: item.primary_id.clone(),
            grouping_id: item.grouping_id.clone(),
            progress: 0.0,
            duration: None,
            current_time: 0.0,
            started_at: Some(now),
            last_update: now,
            finished_at: None,
            status: SyncStatus::Desynchronized,
        });
        row.current_time = current_time;
        if let Some(duration) = duration {
            row.duration = Some(duration);
        }
        row.progress = match row.duration {
            Some(duration) if duration > 0.0 => (current_time / duration).clamp(0.0, 1.0),
            _ => row.progress,
        };
        if row.progress >= 1.0 && row.finished_at.is_none() {
            row.finished_at = Some(now);
        }
        row.last_update = now;
        row.status = SyncStatus::Desynchronized;
        if is_new {
            storage::progress::insert(&txn, row.clone()).await?;
        } else {
            storage::progress::replace(&txn, row.clone()).await?;
        }
        txn.commit().await?;
        self.publish_updated(&row);
        Ok(row)
    }

    pub async fn mark_finished(&self, item: &ItemIdentifier) -> Result<()> {
        ensure_playable(item)?;
        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let txn = self.db.begin().await?;
        let mut row = storage::progress::find_active(&txn, item)
            .await?
            .ok_or_else(|| not_found(item))?;
        row.progress = 1.0;
        if let Some(duration) = row.duration {
            row.current_time = duration;
        }
        row.finished_at = Some(now);
        row.last_update = now;
        row.status = SyncStatus::Desynchronized;
        storage::progress::replace(&txn, row.clone()).await?;
        txn.commit().await?;
        self.publish_updated(&row);
        Ok(())
    }

    /// Manual reset back to the beginning; the record stays and is pushed on
    /// the next sync.
    pub async fn reset(&self, item: &ItemIdentifier) -> Result<()> {
        ensure_playable(item)?;
        let _guard = self.gate.lock().await;
        let now = Utc::now();
        let txn = self.db.begin().await?;
        let mut row = storage::progress::find_active(&txn, item)
            .await?
            .ok_or_else(|| not_found(item))?;
        row.progress = 0.0;
        row.current_time = 0.0;
        row.started_at = None;
        row.finished_at = None;
        row.last_update = now;
        row.status = SyncStatus::Desynchronized;
        storage::progress::replace(&txn, row.clone()).await?;
        txn.commit().await?;
        self.publish_updated(&row);
        Ok(())
    }

    /// Tombstone the record; the remote deletion is issued on the next sync.
    pub async fn remove(&self, item: &ItemIdentifier) -> Result<()> {
        ensure_playable(item)?;
        let _guard = self.gate.lock().await;
        let txn = self.db.begin().await?;
        let mut row = storage::progress::find_active(&txn, item)
            .await?
            .ok_or_else(|| not_found(item))?;
        row.last_update = Utc::now();
        row.status = SyncStatus::Tombstone;
        storage::progress::replace(&txn, row.clone()).await?;
        txn.commit().await?;
        self.publish_updated(&row);
        Ok(())
    }

    fn publish_updated(&self, row: &progress::Model) {
        self.events.publish(Event::ProgressUpdated {
            connection_id: row.connection_id.clone(),
            primary_id: row.primary_id.clone(),
            grouping_id: row.grouping_id.clone(),
        });
    }
}

fn ensure_playable(item: &ItemIdentifier) -> Result<()> {
    if item.kind.is_playable() {
        Ok(())
    } else {
        Err(SyncError::UnsupportedItemType(item.kind))
    }
}

fn not_found(item: &ItemIdentifier) -> SyncError {
    SyncError::NotFound(format!("{}/{}", item.connection_id, item.primary_id))
}
