//! Reservation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    pub user_id: String,
    pub parking_spot_id: i32,
    pub car_number: String,

    #[sea_orm(nullable)]
    pub start_time_of_reservation: Option<DateTimeUtc>,
    #[sea_orm(nullable)]
    pub start_time_of_parking: Option<DateTimeUtc>,
    #[sea_orm(nullable)]
    pub end_time_of_parking: Option<DateTimeUtc>,

    /// Parking duration in seconds
    #[sea_orm(nullable)]
    pub duration_secs: Option<i64>,

    pub is_gate_opened: bool,

    /// Reservation status: Pending, Active, Completed, Canceled
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::parking_spot::Entity",
        from = "Column::ParkingSpotId",
        to = "super::parking_spot::Column::Id"
    )]
    ParkingSpot,
}

impl Related<super::parking_spot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ParkingSpot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
