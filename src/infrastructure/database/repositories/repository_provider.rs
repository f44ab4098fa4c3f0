//! SeaORM implementation of RepositoryProvider

use sea_orm::DatabaseConnection;

use crate::domain::parking_spot::ParkingSpotRepository;
use crate::domain::repositories::RepositoryProvider;
use crate::domain::reservation::ReservationRepository;

use super::parking_spot_repository::SeaOrmParkingSpotRepository;
use super::reservation_repository::SeaOrmReservationRepository;

/// Unified repository provider backed by SeaORM.
///
/// Holds one connection pool and exposes per-aggregate repository accessors.
///
/// ```ignore
/// let repos = SeaOrmRepositoryProvider::new(db.clone());
/// let r = repos.reservations().find_eligible_for_gate("user-1").await?;
/// ```
pub struct SeaOrmRepositoryProvider {
    reservations: SeaOrmReservationRepository,
    parking_spots: SeaOrmParkingSpotRepository,
}

impl SeaOrmRepositoryProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            reservations: SeaOrmReservationRepository::new(db.clone()),
            parking_spots: SeaOrmParkingSpotRepository::new(db),
        }
    }
}

impl RepositoryProvider for SeaOrmRepositoryProvider {
    fn reservations(&self) -> &dyn ReservationRepository {
        &self.reservations
    }

    fn parking_spots(&self) -> &dyn ParkingSpotRepository {
        &self.parking_spots
    }
}
