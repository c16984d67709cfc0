use std::collections::HashSet;

use entities::progress::{self, SyncStatus};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    QueryFilter, QueryOrder,
    sea_query::Expr,
};

use crate::domain::models::ItemIdentifier;
use crate::error::Result;

fn to_active(model: progress::Model) -> progress::ActiveModel {
    progress::ActiveModel {
        id: Set(model.id),
        connection_id: Set(model.connection_id),
        primary_id: Set(model.primary_id),
        grouping_id: Set(model.grouping_id),
        progress: Set(model.progress),
        duration: Set(model.duration),
        current_time: Set(model.current_time),
        started_at: Set(model.started_at),
        last_update: Set(model.last_update),
        finished_at: Set(model.finished_at),
        status: Set(model.status),
    }
}

pub async fn all_for_connection<C: ConnectionTrait>(
    db: &C,
    connection_id: &str,
) -> Result<Vec<progress::Model>> {
    Ok(progress::Entity::find()
        .filter(progress::Column::ConnectionId.eq(connection_id))
        .all(db)
        .await?)
}

/// The one non-tombstoned record for an item, newest first if the duplicate
/// invariant was violated.
pub async fn find_active<C: ConnectionTrait>(
    db: &C,
    item: &ItemIdentifier,
) -> Result<Option<progress::Model>> {
    let mut query = progress::Entity::find()
        .filter(progress::Column::ConnectionId.eq(item.connection_id.as_str()))
        .filter(progress::Column::PrimaryId.eq(item.primary_id.as_str()))
        .filter(progress::Column::Status.ne(SyncStatus::Tombstone));
    query = match &item.grouping_id {
        Some(grouping) => query.filter(progress::Column::GroupingId.eq(grouping.as_str())),
        None => query.filter(progress::Column::GroupingId.is_null()),
    };
    Ok(query
        .order_by(progress::Column::LastUpdate, Order::Desc)
        .one(db)
        .await?)
}

pub async fn insert<C: ConnectionTrait>(db: &C, model: progress::Model) -> Result<()> {
    progress::Entity::insert(to_active(model)).exec(db).await?;
    Ok(())
}

/// Full-row update keyed by id.
pub async fn replace<C: ConnectionTrait>(db: &C, model: progress::Model) -> Result<()> {
    to_active(model).update(db).await?;
    Ok(())
}

pub async fn delete_by_ids<C: ConnectionTrait>(db: &C, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let res = progress::Entity::delete_many()
        .filter(progress::Column::Id.is_in(ids.iter().cloned()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn delete_for_connection<C: ConnectionTrait>(db: &C, connection_id: &str) -> Result<u64> {
    let res = progress::Entity::delete_many()
        .filter(progress::Column::ConnectionId.eq(connection_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn mark_synchronized<C: ConnectionTrait>(db: &C, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    progress::Entity::update_many()
        .col_expr(progress::Column::Status, Expr::value(SyncStatus::Synchronized))
        .filter(progress::Column::Id.is_in(ids.iter().cloned()))
        .exec(db)
        .await?;
    Ok(())
}

/// Enforce the at-most-one-live-record-per-triple invariant, keeping the most
/// recently updated row.
pub async fn prune_duplicates<C: ConnectionTrait>(db: &C, connection_id: &str) -> Result<u64> {
    let rows = progress::Entity::find()
        .filter(progress::Column::ConnectionId.eq(connection_id))
        .filter(progress::Column::Status.ne(SyncStatus::Tombstone))
        .order_by(progress::Column::LastUpdate, Order::Desc)
        .all(db)
        .await?;

    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
    let mut stale: Vec<String> = Vec::new();
    for row in rows {
        if !seen.insert((row.primary_id.clone(), row.grouping_id.clone())) {
            stale.push(row.id);
        }
    }
    if stale.is_empty() {
        return Ok(0);
    }
    tracing::debug!(connection_id, pruned = stale.len(), "pruning duplicate progress records");
    let res = progress::Entity::delete_many()
        .filter(progress::Column::Id.is_in(stale))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
