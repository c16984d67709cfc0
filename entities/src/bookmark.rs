use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A user bookmark, keyed by (connection, primary item, whole-second offset).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookmarks")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub connection_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub primary_id: String,
    /// Offset into the track, whole seconds.
    #[sea_orm(primary_key, auto_increment = false)]
    pub time: i64,
    pub note: String,
    pub created_at: DateTimeUtc,
    pub status: BookmarkStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "camelCase")]
pub enum BookmarkStatus {
    #[sea_orm(string_value = "synced")]
    Synced,
    #[sea_orm(string_value = "pendingCreation")]
    PendingCreation,
    #[sea_orm(string_value = "pendingUpdate")]
    PendingUpdate,
    /// Soft-deleted locally until the remote deletion succeeds.
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
