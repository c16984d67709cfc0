// Mapping between wire DTOs (epoch milliseconds, libraryItemId/episodeId)
// and local rows (wall-clock time, primary/grouping ids).

use chrono::{DateTime, Utc};
use entities::progress::{self, SyncStatus};
use entities::bookmark::{self, BookmarkStatus};

use crate::abs_client::{AudioBookmarkDto, MediaProgressDto, ProgressUpdateDto};

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn opt_millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Signed difference remote minus local, truncated to whole seconds.
///
/// Sub-second clock skew between client and server must not flip the
/// last-write-wins decision, so anything inside the same second is a tie.
pub fn delta_seconds(remote_ms: i64, local: &DateTime<Utc>) -> i64 {
    remote_ms.div_euclid(1000) - local.timestamp()
}

/// Primary id of a progress payload: the episode when present, otherwise the
/// library item itself.
pub fn remote_primary_id(dto: &MediaProgressDto) -> &str {
    dto.episode_id.as_deref().unwrap_or(&dto.library_item_id)
}

/// Grouping id of a progress payload: the owning podcast item for episodes.
pub fn remote_grouping_id(dto: &MediaProgressDto) -> Option<&str> {
    dto.episode_id.as_ref().map(|_| dto.library_item_id.as_str())
}

/// Build a fresh local row from a remote payload the store has never seen.
pub fn remote_to_progress(connection_id: &str, dto: &MediaProgressDto) -> progress::Model {
    progress::Model {
        id: dto.id.clone(),
        connection_id: connection_id.to_string(),
        primary_id: remote_primary_id(dto).to_string(),
        grouping_id: remote_grouping_id(dto).map(str::to_string),
        progress: dto.progress,
        duration: dto.duration,
        current_time: dto.current_time,
        started_at: opt_millis_to_datetime(dto.started_at),
        last_update: millis_to_datetime(dto.last_update),
        finished_at: opt_millis_to_datetime(dto.finished_at),
        status: SyncStatus::Synchronized,
    }
}

/// Overwrite a matched local row with remote values; remote is authoritative,
/// so the row adopts the server session id and comes back synchronized.
pub fn apply_remote_progress(local: &progress::Model, dto: &MediaProgressDto) -> progress::Model {
    progress::Model {
        id: dto.id.clone(),
        connection_id: local.connection_id.clone(),
        primary_id: local.primary_id.clone(),
        grouping_id: local.grouping_id.clone(),
        progress: dto.progress,
        duration: dto.duration,
        current_time: dto.current_time,
        started_at: opt_millis_to_datetime(dto.started_at),
        last_update: millis_to_datetime(dto.last_update),
        finished_at: opt_millis_to_datetime(dto.finished_at),
        status: SyncStatus::Synchronized,
    }
}

/// Wire form of a local row for the batched update endpoint.
pub fn progress_to_update(model: &progress::Model) -> ProgressUpdateDto {
    let (library_item_id, episode_id) = match &model.grouping_id {
        Some(grouping) => (grouping.clone(), Some(model.primary_id.clone())),
        None => (model.primary_id.clone(), None),
    };
    ProgressUpdateDto {
        library_item_id,
        episode_id,
        duration: model.duration,
        progress: model.progress,
        current_time: model.current_time,
        is_finished: model.finished_at.is_some() || model.progress >= 1.0,
        last_update: model.last_update.timestamp_millis(),
        started_at: model.started_at.map(|t| t.timestamp_millis()),
        finished_at: model.finished_at.map(|t| t.timestamp_millis()),
    }
}

pub fn remote_to_bookmark(connection_id: &str, dto: &AudioBookmarkDto) -> bookmark::Model {
    bookmark::Model {
        connection_id: connection_id.to_string(),
        primary_id: dto.library_item_id.clone(),
        time: dto.time,
        note: dto.title.clone(),
        created_at: millis_to_datetime(dto.created_at),
        status: BookmarkStatus::Synced,
    }
}
