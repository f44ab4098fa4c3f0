//! Create reservations table

use sea_orm_migration::prelude::*;

use super::m20240101_000001_create_parking_spots::ParkingSpots;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reservations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reservations::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Reservations::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Reservations::ParkingSpotId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Reservations::CarNumber).string().not_null())
                    .col(ColumnDef::new(Reservations::StartTimeOfReservation).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservations::StartTimeOfParking).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservations::EndTimeOfParking).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservations::DurationSecs).big_integer())
                    .col(
                        ColumnDef::new(Reservations::Status)
                            .string()
                            .not_null()
                            .default("Pending"),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reservations_parking_spot")
                            .from(Reservations::Table, Reservations::ParkingSpotId)
                            .to(ParkingSpots::Table, ParkingSpots::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reservations_user")
                    .table(Reservations::Table)
                    .col(Reservations::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reservations_status")
                    .table(Reservations::Table)
                    .col(Reservations::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reservations::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Reservations {
    Table,
    Id,
    UserId,
    ParkingSpotId,
    CarNumber,
    StartTimeOfReservation,
    StartTimeOfParking,
    EndTimeOfParking,
    DurationSecs,
    Status,
}
