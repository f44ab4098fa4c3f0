//! Create parking_spots table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ParkingSpots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ParkingSpots::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ParkingSpots::Name).string().not_null())
                    .col(ColumnDef::new(ParkingSpots::GateDeviceId).string())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ParkingSpots::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ParkingSpots {
    Table,
    Id,
    Name,
    GateDeviceId,
}
