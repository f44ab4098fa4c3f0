//! Reservation domain entity

use chrono::{DateTime, Duration, Utc};

use crate::shared::errors::DomainError;

/// Reservation status
///
/// Transitions: `Pending -> Active -> Completed`, and `Canceled` from
/// `Pending` or `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Spot reserved, car not yet parked
    Pending,
    /// Car is parked
    Active,
    /// Parking session finished
    Completed,
    /// Reservation cancelled by the user
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
        }
    }

    /// Parse a stored status. Unknown values map to `Canceled`, which is
    /// never eligible for actuation.
    pub fn from_str(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Active" => Self::Active,
            "Completed" => Self::Completed,
            "Canceled" => Self::Canceled,
            _ => Self::Canceled,
        }
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Active) | (Active, Completed) | (Pending, Canceled) | (Active, Canceled)
        )
    }

    /// Check that a stored reservation in this status may be overwritten
    /// with `next`. Rewriting the same status is allowed.
    pub fn check_update(self, id: i32, next: ReservationStatus) -> Result<(), DomainError> {
        if self == next || self.can_transition_to(next) {
            return Ok(());
        }
        Err(DomainError::InvalidTransition {
            entity: "Reservation",
            id,
            from: self.to_string(),
            to: next.to_string(),
        })
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parking spot reservation
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: i32,
    /// Owning user
    pub user_id: String,
    pub parking_spot_id: i32,
    pub car_number: String,
    pub start_time_of_reservation: Option<DateTime<Utc>>,
    pub start_time_of_parking: Option<DateTime<Utc>>,
    pub end_time_of_parking: Option<DateTime<Utc>>,
    /// Parking duration, set when the session completes
    pub duration: Option<Duration>,
    /// Set once, by a successful gate-open outcome; never reverts
    pub is_gate_opened: bool,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn new(
        id: i32,
        user_id: impl Into<String>,
        parking_spot_id: i32,
        car_number: impl Into<String>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            parking_spot_id,
            car_number: car_number.into(),
            start_time_of_reservation: Some(Utc::now()),
            start_time_of_parking: None,
            end_time_of_parking: None,
            duration: None,
            is_gate_opened: false,
            status: ReservationStatus::Pending,
        }
    }

    /// Whether the gate may be actuated for this reservation.
    pub fn is_eligible_for_gate(&self) -> bool {
        self.status == ReservationStatus::Pending && !self.is_gate_opened
    }

    /// Record a successful gate-open outcome.
    pub fn mark_gate_opened(&mut self) -> Result<(), DomainError> {
        if !self.is_eligible_for_gate() {
            return Err(DomainError::InvalidTransition {
                entity: "Reservation",
                id: self.id,
                from: format!("{} (gate opened: {})", self.status, self.is_gate_opened),
                to: "gate opened".to_string(),
            });
        }
        self.is_gate_opened = true;
        Ok(())
    }

    /// Car entered the spot
    pub fn activate(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ReservationStatus::Active)?;
        self.start_time_of_parking = Some(at);
        Ok(())
    }

    /// Parking session finished; computes the duration
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(ReservationStatus::Completed)?;
        self.end_time_of_parking = Some(at);
        self.duration = self.start_time_of_parking.map(|start| at - start);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.transition(ReservationStatus::Canceled)
    }

    fn transition(&mut self, next: ReservationStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "Reservation",
                id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────
