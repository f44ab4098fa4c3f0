//! Repository traits for the domain layer
//!
//! Contains:
//! - `RepositoryProvider`: unified access to all per-aggregate repositories
//! - `DomainResult`: standard result type for domain operations

use super::parking_spot::ParkingSpotRepository;
use super::reservation::ReservationRepository;
use crate::shared::errors::DomainError;

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

/// Provides access to all domain repositories.
///
/// Consumers request only the repository they need:
///
/// ```ignore
/// async fn handle(repos: &dyn RepositoryProvider) {
///     let r = repos.reservations().find_eligible_for_gate("user-1").await?;
///     let spot = repos.parking_spots().find_by_id(r.parking_spot_id).await?;
/// }
/// ```
pub trait RepositoryProvider: Send + Sync {
    fn reservations(&self) -> &dyn ReservationRepository;
    fn parking_spots(&self) -> &dyn ParkingSpotRepository;
}
