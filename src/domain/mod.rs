pub mod gate;
pub mod parking_spot;
pub mod repositories;
pub mod reservation;

// Re-export commonly used types
pub use gate::{CorrelationKey, GateCommand, GateOutcome, GateTopics, StatusReport};
pub use parking_spot::{ParkingSpot, ParkingSpotRepository};
pub use repositories::{DomainResult, RepositoryProvider};
pub use reservation::{Reservation, ReservationRepository, ReservationStatus};

// Re-export DomainError from shared for convenience
pub use crate::shared::errors::DomainError;
