//! Parking spot repository interface

use async_trait::async_trait;

use super::model::ParkingSpot;
use crate::domain::DomainResult;

#[async_trait]
pub trait ParkingSpotRepository: Send + Sync {
    /// Save a new parking spot
    async fn save(&self, spot: ParkingSpot) -> DomainResult<()>;

    /// Find parking spot by ID
    async fn find_by_id(&self, id: i32) -> DomainResult<Option<ParkingSpot>>;

    /// Find all parking spots
    async fn find_all(&self) -> DomainResult<Vec<ParkingSpot>>;
}
