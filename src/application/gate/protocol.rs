//! Gate command protocol
//!
//! Turns "open this gate" into: check connectivity, claim the gate's
//! single-flight slot, subscribe to its status topic, register a waiter,
//! publish the command, await the correlated report.
//!
//! Single-flight is keyed by status topic, not by device. Controllers that
//! still share the legacy status topic therefore run one command at a time,
//! which keeps the content-based fallback (reports without a correlation
//! id) unambiguous.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::timeout;
use tracing::{info, warn};

use super::registry::CorrelationRegistry;
use crate::application::ports::{GateTransport, OutboundMessage, QoS};
use crate::config::AppConfig;
use crate::domain::gate::{CorrelationKey, GateCommand, GateOutcome, GateTopics};
use crate::domain::ParkingSpot;

/// Protocol timing and publish settings
#[derive(Debug, Clone)]
pub struct GateProtocolConfig {
    pub topic_prefix: String,
    /// Upper bound for the whole exchange, publish included
    pub response_timeout: Duration,
    /// Broker-side expiry of the command
    pub command_expiry: Duration,
    pub retain_command: bool,
}

impl Default for GateProtocolConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "parking/gate".to_string(),
            response_timeout: Duration::from_secs(5),
            command_expiry: Duration::from_secs(180),
            retain_command: true,
        }
    }
}

impl From<&AppConfig> for GateProtocolConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            topic_prefix: cfg.gate.topic_prefix.clone(),
            response_timeout: Duration::from_millis(cfg.gate.response_timeout_ms),
            command_expiry: Duration::from_secs(u64::from(cfg.gate.command_expiry_secs)),
            retain_command: cfg.gate.retain_command,
        }
    }
}

/// Result of one command exchange
#[derive(Debug, Clone, PartialEq)]
pub struct GateExchange {
    /// Key the command was published with; `None` if nothing was sent
    pub key: Option<CorrelationKey>,
    pub outcome: GateOutcome,
}

impl GateExchange {
    fn unsent(outcome: GateOutcome) -> Self {
        Self { key: None, outcome }
    }

    fn sent(key: CorrelationKey, outcome: GateOutcome) -> Self {
        Self {
            key: Some(key),
            outcome,
        }
    }
}

/// Held while a command for one status topic is outstanding
struct InFlightSlot<'a> {
    slots: &'a DashMap<String, Instant>,
    topic: String,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.topic);
    }
}

pub struct GateProtocol {
    transport: Arc<dyn GateTransport>,
    registry: Arc<CorrelationRegistry>,
    in_flight: DashMap<String, Instant>,
    config: GateProtocolConfig,
}

pub type SharedGateProtocol = Arc<GateProtocol>;

impl GateProtocol {
    pub fn new(
        transport: Arc<dyn GateTransport>,
        registry: Arc<CorrelationRegistry>,
        config: GateProtocolConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            in_flight: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GateProtocolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Topics of the gate in front of `spot`; legacy shared topics without one.
    pub fn topics_for(&self, spot: Option<&ParkingSpot>) -> GateTopics {
        match spot {
            Some(spot) => spot.gate_topics(&self.config.topic_prefix),
            None => GateTopics::shared(&self.config.topic_prefix),
        }
    }

    /// Whether a command for this gate is outstanding
    pub fn is_busy(&self, topics: &GateTopics) -> bool {
        self.in_flight.contains_key(&topics.status)
    }

    /// Send one open command and wait for the gate's answer.
    ///
    /// Always returns within `response_timeout` plus scheduling slack.
    pub async fn open_gate(&self, topics: &GateTopics) -> GateOutcome {
        self.execute(topics).await.outcome
    }

    /// Like [`open_gate`](Self::open_gate), also reporting the correlation
    /// key the command went out with.
    pub async fn execute(&self, topics: &GateTopics) -> GateExchange {
        let started = Instant::now();
        let exchange = self.exchange(topics, started + self.config.response_timeout).await;

        metrics::counter!("gate_commands_total", "outcome" => exchange.outcome.as_str()).increment(1);
        metrics::histogram!("gate_command_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::gauge!("gate_commands_pending").set(self.registry.pending_count() as f64);

        exchange
    }

    async fn exchange(&self, topics: &GateTopics, deadline: Instant) -> GateExchange {
        if !self.transport.is_connected() {
            warn!(command_topic = topics.command.as_str(), "Broker not connected, gate command not sent");
            return GateExchange::unsent(GateOutcome::TransportUnavailable);
        }

        let Some(_slot) = self.claim(&topics.status) else {
            warn!(status_topic = topics.status.as_str(), "Gate busy with another command");
            return GateExchange::unsent(GateOutcome::Busy);
        };

        // Subscribe and publish travel in order on the one connection, so
        // the subscription is active before the device can answer.
        match timeout(remaining(deadline), self.transport.subscribe(&topics.status)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Status subscription failed");
                return GateExchange::unsent(GateOutcome::TransportUnavailable);
            }
            Err(_) => {
                warn!(status_topic = topics.status.as_str(), "Status subscription timed out");
                return GateExchange::unsent(GateOutcome::TransportUnavailable);
            }
        }

        let key = CorrelationKey::generate();
        let waiter = match self.registry.register(key.clone(), &topics.status) {
            Ok(waiter) => waiter,
            Err(e) => {
                warn!(error = %e, "Correlation key collision");
                return GateExchange::unsent(GateOutcome::Busy);
            }
        };

        let command = GateCommand::open(key, topics.clone(), self.config.command_expiry);
        let message = OutboundMessage {
            topic: command.topics.command.clone(),
            payload: command.payload.clone(),
            qos: QoS::AtLeastOnce,
            retain: self.config.retain_command,
            expiry: Some(command.expires_in),
        };

        info!(
            correlation_key = %command.key,
            command_topic = command.topics.command.as_str(),
            status_topic = command.topics.status.as_str(),
            expiry_secs = command.expiry_secs(),
            "Publishing gate open command"
        );

        // Dropping the waiter on these paths withdraws it
        match timeout(remaining(deadline), self.transport.publish(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(correlation_key = %command.key, error = %e, "Gate command publish failed");
                return GateExchange::sent(command.key, GateOutcome::TransportUnavailable);
            }
            Err(_) => {
                warn!(correlation_key = %command.key, "Gate command publish timed out");
                return GateExchange::sent(command.key, GateOutcome::TransportUnavailable);
            }
        }

        let outcome = self
            .registry
            .await_outcome(waiter, remaining(deadline))
            .await;

        info!(
            correlation_key = %command.key,
            outcome = %outcome,
            elapsed_ms = (Utc::now() - command.issued_at).num_milliseconds(),
            "Gate command finished"
        );
        GateExchange::sent(command.key, outcome)
    }

    fn claim(&self, status_topic: &str) -> Option<InFlightSlot<'_>> {
        match self.in_flight.entry(status_topic.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(InFlightSlot {
                    slots: &self.in_flight,
                    topic: status_topic.to_string(),
                })
            }
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
