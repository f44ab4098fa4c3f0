//! Reservation gatekeeper
//!
//! Opens the gate for a user's pending reservation and records, exactly
//! once, that it was opened. The flag is only written after the device
//! confirmed `Opened`, through a conditional update, so concurrent or
//! repeated requests can never flip it twice.

use std::sync::Arc;

use dashmap::DashSet;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::gate::{GateExchange, SharedGateProtocol};
use crate::domain::gate::{CorrelationKey, GateOutcome};
use crate::domain::{DomainError, RepositoryProvider, Reservation};
use crate::shared::retry::{retry_with_backoff, RetryConfig};

/// Why a gate request did not end with an opened gate and a saved flag
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error("No pending reservation with a closed gate for user {user_id}")]
    NotFound { user_id: String },

    #[error("No car detected at the gate")]
    NoCarDetected,

    #[error("Gate controller reported an error: {0}")]
    ErrorFromGate(String),

    #[error("Gate controller did not respond in time")]
    EspFailure,

    #[error("Gate broker is not reachable")]
    TransportUnavailable,

    #[error("Another command for this gate or reservation is in progress")]
    Busy,

    #[error("Gate opened for reservation {reservation_id} but the flag was not saved: {reason}")]
    PostActuationPersistenceFailure { reservation_id: i32, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl GateError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "Reservation.NotFound",
            Self::NoCarDetected => "Reservation.NoCarDetected",
            Self::ErrorFromGate(_) => "Reservation.ErrorFromGate",
            Self::EspFailure => "Reservation.EspFailure",
            Self::TransportUnavailable => "Gate.TransportUnavailable",
            Self::Busy => "Gate.Busy",
            Self::PostActuationPersistenceFailure { .. } => "Reservation.GateStateNotSaved",
            Self::Storage(_) => "Storage.Failure",
        }
    }

    /// Whether the request may succeed when repeated.
    ///
    /// `NotFound` needs a new reservation. A post-actuation failure means the
    /// gate already opened; repeating would actuate it again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::PostActuationPersistenceFailure { .. }
        )
    }

    fn from_outcome(outcome: GateOutcome) -> Option<Self> {
        match outcome {
            GateOutcome::Opened => None,
            GateOutcome::NoCarDetected => Some(Self::NoCarDetected),
            GateOutcome::HardwareError(text) => Some(Self::ErrorFromGate(text)),
            GateOutcome::Timeout => Some(Self::EspFailure),
            GateOutcome::TransportUnavailable => Some(Self::TransportUnavailable),
            GateOutcome::Busy => Some(Self::Busy),
        }
    }
}

impl From<DomainError> for GateError {
    fn from(e: DomainError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Held while a reservation's gate cycle is running
struct ReservationClaim<'a> {
    claims: &'a DashSet<i32>,
    id: i32,
}

impl Drop for ReservationClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

pub struct ReservationGatekeeper {
    repos: Arc<dyn RepositoryProvider>,
    protocol: SharedGateProtocol,
    in_flight: DashSet<i32>,
    persist_retry: RetryConfig,
}

pub type SharedGatekeeper = Arc<ReservationGatekeeper>;

impl ReservationGatekeeper {
    pub fn new(repos: Arc<dyn RepositoryProvider>, protocol: SharedGateProtocol) -> Self {
        Self::with_retry(repos, protocol, RetryConfig::default())
    }

    pub fn with_retry(
        repos: Arc<dyn RepositoryProvider>,
        protocol: SharedGateProtocol,
        persist_retry: RetryConfig,
    ) -> Self {
        Self {
            repos,
            protocol,
            in_flight: DashSet::new(),
            persist_retry,
        }
    }

    /// Open the gate for `user_id`'s pending reservation.
    ///
    /// Returns the reservation with `is_gate_opened` set on success. On any
    /// other outcome the stored reservation is left untouched.
    pub async fn open_gate_for(&self, user_id: &str) -> Result<Reservation, GateError> {
        let candidate = self
            .repos
            .reservations()
            .find_eligible_for_gate(user_id)
            .await?
            .ok_or_else(|| not_found(user_id))?;

        let Some(_claim) = self.claim(candidate.id) else {
            warn!(user_id, reservation_id = candidate.id, "Gate cycle already running for reservation");
            return Err(GateError::Busy);
        };

        // A cycle that finished between the lookup and the claim has already
        // saved the flag; re-read under the claim.
        let reservation = match self.repos.reservations().find_by_id(candidate.id).await? {
            Some(r) if r.is_eligible_for_gate() => r,
            _ => return Err(not_found(user_id)),
        };

        let spot = self
            .repos
            .parking_spots()
            .find_by_id(reservation.parking_spot_id)
            .await?;
        if spot.is_none() {
            warn!(
                reservation_id = reservation.id,
                parking_spot_id = reservation.parking_spot_id,
                "Parking spot not found, using shared gate topics"
            );
        }
        let topics = self.protocol.topics_for(spot.as_ref());

        info!(
            user_id,
            reservation_id = reservation.id,
            command_topic = topics.command.as_str(),
            "🚧 Opening gate"
        );

        let GateExchange { key, outcome } = self.protocol.execute(&topics).await;
        if let Some(err) = GateError::from_outcome(outcome) {
            info!(user_id, reservation_id = reservation.id, code = err.code(), "Gate not opened");
            return Err(err);
        }

        self.persist_opened(reservation, key).await
    }

    async fn persist_opened(
        &self,
        mut reservation: Reservation,
        key: Option<CorrelationKey>,
    ) -> Result<Reservation, GateError> {
        let id = reservation.id;
        let reservations = self.repos.reservations();

        let result = retry_with_backoff(
            self.persist_retry.clone(),
            || reservations.mark_gate_opened(id),
            DomainError::is_transient,
            "mark_gate_opened",
        )
        .await;

        let reason = match result {
            Ok(true) => {
                reservation.is_gate_opened = true;
                info!(reservation_id = id, correlation_key = ?key.as_ref().map(|k| k.as_str()), "✅ Gate opened");
                return Ok(reservation);
            }
            Ok(false) => "reservation changed while the gate was opening".to_string(),
            Err(e) => e.to_string(),
        };

        metrics::counter!("gate_post_actuation_failures_total").increment(1);
        error!(
            reservation_id = id,
            user_id = reservation.user_id.as_str(),
            correlation_key = ?key.as_ref().map(|k| k.as_str()),
            reason = reason.as_str(),
            "Gate physically opened but reservation flag not saved"
        );
        Err(GateError::PostActuationPersistenceFailure {
            reservation_id: id,
            reason,
        })
    }

    fn claim(&self, id: i32) -> Option<ReservationClaim<'_>> {
        if !self.in_flight.insert(id) {
            return None;
        }
        Some(ReservationClaim {
            claims: &self.in_flight,
            id,
        })
    }
}

fn not_found(user_id: &str) -> GateError {
    GateError::NotFound {
        user_id: user_id.to_string(),
    }
}
