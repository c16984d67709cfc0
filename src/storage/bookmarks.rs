use entities::bookmark::{self, BookmarkStatus};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    sea_query::Expr,
};

use crate::error::Result;

fn to_active(model: bookmark::Model) -> bookmark::ActiveModel {
    bookmark::ActiveModel {
        connection_id: Set(model.connection_id),
        primary_id: Set(model.primary_id),
        time: Set(model.time),
        note: Set(model.note),
        created_at: Set(model.created_at),
        status: Set(model.status),
    }
}

pub async fn all_for_connection<C: ConnectionTrait>(
    db: &C,
    connection_id: &str,
) -> Result<Vec<bookmark::Model>> {
    Ok(bookmark::Entity::find()
        .filter(bookmark::Column::ConnectionId.eq(connection_id))
        .all(db)
        .await?)
}

pub async fn find<C: ConnectionTrait>(
    db: &C,
    connection_id: &str,
    primary_id: &str,
    time: i64,
) -> Result<Option<bookmark::Model>> {
    Ok(bookmark::Entity::find_by_id((
        connection_id.to_string(),
        primary_id.to_string(),
        time,
    ))
    .one(db)
    .await?)
}

pub async fn insert<C: ConnectionTrait>(db: &C, model: bookmark::Model) -> Result<()> {
    bookmark::Entity::insert(to_active(model)).exec(db).await?;
    Ok(())
}

/// Full-row update keyed by (connection, primary, time).
pub async fn replace<C: ConnectionTrait>(db: &C, model: bookmark::Model) -> Result<()> {
    to_active(model).update(db).await?;
    Ok(())
}

pub async fn delete<C: ConnectionTrait>(
    db: &C,
    connection_id: &str,
    primary_id: &str,
    time: i64,
) -> Result<u64> {
    let res = bookmark::Entity::delete_by_id((
        connection_id.to_string(),
        primary_id.to_string(),
        time,
    ))
    .exec(db)
    .await?;
    Ok(res.rows_affected)
}

pub async fn delete_for_connection<C: ConnectionTrait>(db: &C, connection_id: &str) -> Result<u64> {
    let res = bookmark::Entity::delete_many()
        .filter(bookmark::Column::ConnectionId.eq(connection_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn set_status<C: ConnectionTrait>(
    db: &C,
    connection_id: &str,
    keys: &[(String, i64)],
    status: BookmarkStatus,
) -> Result<()> {
    for (primary_id, time) in keys {
        bookmark::Entity::update_many()
            .col_expr(bookmark::Column::Status, Expr::value(status))
            .filter(bookmark::Column::ConnectionId.eq(connection_id))
            .filter(bookmark::Column::PrimaryId.eq(primary_id.as_str()))
            .filter(bookmark::Column::Time.eq(*time))
            .exec(db)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    fn mark(primary: &str, time: i64, status: BookmarkStatus) -> bookmark::Model {
        bookmark::Model {
            connection_id: "c1".into(),
            primary_id: primary.into(),
            time,
            note: "note".into(),
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            status,
        }
    }

    #[tokio::test]
    async fn composite_key_lookup_and_delete() {
        let db = test_db().await;
        insert(&db, mark("item", 120, BookmarkStatus::Synced))
            .await
            .unwrap();
        insert(&db, mark("item", 240, BookmarkStatus::PendingCreation))
            .await
            .unwrap();

        let found = find(&db, "c1", "item", 120).await.unwrap().unwrap();
        assert_eq!(found.status, BookmarkStatus::Synced);
        assert!(find(&db, "c1", "item", 121).await.unwrap().is_none());

        assert_eq!(delete(&db, "c1", "item", 120).await.unwrap(), 1);
        assert_eq!(all_for_connection(&db, "c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_status_targets_single_keys() {
        let db = test_db().await;
        insert(&db, mark("item", 120, BookmarkStatus::PendingCreation))
            .await
            .unwrap();
        insert(&db, mark("item", 240, BookmarkStatus::PendingCreation))
            .await
            .unwrap();

        set_status(
            &db,
            "c1",
            &[("item".to_string(), 120)],
            BookmarkStatus::Synced,
        )
        .await
        .unwrap();

        let rows = all_for_connection(&db, "c1").await.unwrap();
        for row in rows {
            match row.time {
                120 => assert_eq!(row.status, BookmarkStatus::Synced),
                240 => assert_eq!(row.status, BookmarkStatus::PendingCreation),
                _ => unreachable!(),
            }
        }
    }
}
