//! Add is_gate_opened column to reservations table
//!
//! Set once the gate controller confirmed opening for the reservation.
//! Existing rows start out closed.

use sea_orm_migration::prelude::*;

use super::m20240101_000002_create_reservations::Reservations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Reservations::Table)
                    .add_column(
                        ColumnDef::new(Alias::new("is_gate_opened"))
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Reservations::Table)
                    .drop_column(Alias::new("is_gate_opened"))
                    .to_owned(),
            )
            .await
    }
}
