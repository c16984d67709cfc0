use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bookmarks::Table)
                    .if_not_exists()
                    .col(string(Bookmarks::ConnectionId))
                    .col(string(Bookmarks::PrimaryId))
                    .col(big_integer(Bookmarks::Time))
                    .col(text(Bookmarks::Note))
                    .col(timestamp_with_time_zone(Bookmarks::CreatedAt))
                    .col(string(Bookmarks::Status))
                    .primary_key(
                        Index::create()
                            .name("pk_bookmarks")
                            .col(Bookmarks::ConnectionId)
                            .col(Bookmarks::PrimaryId)
                            .col(Bookmarks::Time),
                    )
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bookmarks::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Bookmarks {
    Table,
    ConnectionId,
    PrimaryId,
    Time,
    Note,
    CreatedAt,
    Status,
}
