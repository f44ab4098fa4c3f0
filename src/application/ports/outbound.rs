//! Outbound ports: interfaces for talking to gate controllers
//!
//! [`GateTransport`] is the contract that decouples the gate protocol from
//! the concrete broker client. Production uses
//! [`MqttTransport`](crate::infrastructure::transport::MqttTransport); tests
//! and local development use
//! [`LoopbackTransport`](crate::infrastructure::transport::LoopbackTransport).
//!
//! Inbound traffic does not go through the trait: each transport hands out
//! exactly one [`InboundStream`] when it starts, and a single dispatcher
//! task drains it for the lifetime of the process.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    /// Broker-side message expiry
    pub expiry: Option<Duration>,
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Broker replayed a retained message on subscribe
    pub retained: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }
}

/// The process-wide inbound message stream
pub type InboundStream = mpsc::UnboundedReceiver<InboundMessage>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Publish/subscribe primitives of the broker connection
#[async_trait]
pub trait GateTransport: Send + Sync {
    /// Current broker connectivity. Reconnection is the transport's own job.
    fn is_connected(&self) -> bool;

    /// Subscribe to `topic`. Idempotent; the transport re-subscribes after
    /// a reconnect.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;
}
