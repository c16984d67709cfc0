use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One playback-progress record per (connection, primary, grouping) triple.
///
/// `id` is the server-assigned session id when the record was imported from the
/// server, or a locally generated uuid for records created by local playback
/// that have not been pushed yet. Durations and positions are seconds; the
/// wire format (milliseconds) is converted at the client boundary.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "progress")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub connection_id: String,
    pub primary_id: String,
    pub grouping_id: Option<String>,
    /// Fraction in [0, 1].
    pub progress: f64,
    pub duration: Option<f64>,
    pub current_time: f64,
    pub started_at: Option<DateTimeUtc>,
    pub last_update: DateTimeUtc,
    pub finished_at: Option<DateTimeUtc>,
    pub status: SyncStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Local and remote agree; the server is authoritative.
    #[sea_orm(string_value = "synchronized")]
    Synchronized,
    /// Local changes not yet confirmed persisted on the server.
    #[sea_orm(string_value = "desynchronized")]
    Desynchronized,
    /// Marked for deletion; the remote counterpart has not confirmed removal.
    #[sea_orm(string_value = "tombstone")]
    Tombstone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
