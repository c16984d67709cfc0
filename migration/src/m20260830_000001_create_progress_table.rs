use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Progress::Table)
                    .if_not_exists()
                    .col(string(Progress::Id).primary_key())
                    .col(string(Progress::ConnectionId))
                    .col(string(Progress::PrimaryId))
                    .col(string_null(Progress::GroupingId))
                    .col(double(Progress::Progress))
                    .col(double_null(Progress::Duration))
                    .col(double(Progress::CurrentTime))
                    .col(timestamp_with_time_zone_null(Progress::StartedAt))
                    .col(timestamp_with_time_zone(Progress::LastUpdate))
                    .col(timestamp_with_time_zone_null(Progress::FinishedAt))
                    .col(string(Progress::Status))
                    .to_owned(),
            )
            .await?;

        // Uniqueness on the triple is enforced in code (tombstones may overlap
        // with a live record), so this index is not unique.
        manager
            .create_index(
                Index::create()
                    .name("idx_progress_connection_item")
                    .table(Progress::Table)
                    .col(Progress::ConnectionId)
                    .col(Progress::PrimaryId)
                    .col(Progress::GroupingId)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Progress::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Progress {
    Table,
    Id,
    ConnectionId,
    PrimaryId,
    GroupingId,
    Progress,
    Duration,
    CurrentTime,
    StartedAt,
    LastUpdate,
    FinishedAt,
    Status,
}
