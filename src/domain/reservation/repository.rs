//! Reservation repository interface

use async_trait::async_trait;

use super::model::Reservation;
use crate::domain::DomainResult;

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Save a new reservation
    async fn save(&self, reservation: Reservation) -> DomainResult<()>;

    /// Find reservation by ID
    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Reservation>>;

    /// Update an existing reservation.
    ///
    /// The stored status may only move forward (`InvalidTransition`
    /// otherwise) and `is_gate_opened` is never written here; only
    /// `mark_gate_opened` sets it.
    async fn update(&self, reservation: Reservation) -> DomainResult<()>;

    /// The user's reservation that may still actuate the gate:
    /// status Pending and gate not yet opened.
    async fn find_eligible_for_gate(&self, user_id: &str) -> DomainResult<Option<Reservation>>;

    /// Atomically set `is_gate_opened` if the reservation is still Pending
    /// and not yet opened. Returns `false` when nothing changed.
    async fn mark_gate_opened(&self, id: i32) -> DomainResult<bool>;

    /// All reservations of a user, newest first
    async fn find_for_user(&self, user_id: &str) -> DomainResult<Vec<Reservation>>;

    /// Cancel a reservation (Pending or Active only)
    async fn cancel(&self, id: i32) -> DomainResult<()>;

    /// Generate next reservation ID
    async fn next_id(&self) -> DomainResult<i32>;
}
