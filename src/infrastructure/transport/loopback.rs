//! In-process transport
//!
//! Stands in for the broker in tests and for local runs without hardware.
//! Published messages are recorded; an optional [`SimulatedGate`] answers
//! open commands on the matching status topic after a delay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::application::ports::{
    GateTransport, InboundMessage, InboundStream, OutboundMessage, TransportError,
};

/// Device reply scheduled by a responder
#[derive(Debug, Clone)]
pub struct DeviceReply {
    pub delay: Duration,
    pub message: InboundMessage,
}

/// Called for every published message; may schedule one reply.
pub type DeviceResponder = Arc<dyn Fn(&OutboundMessage) -> Option<DeviceReply> + Send + Sync>;

/// A scripted gate controller
#[derive(Debug, Clone)]
pub struct SimulatedGate {
    /// Status text to report, e.g. "Gate opened" or "No car detected"
    pub status_text: String,
    pub delay: Duration,
    /// Echo the command's correlation id (newer firmware) or send bare text
    pub echo_correlation: bool,
}

impl SimulatedGate {
    pub fn new(status_text: impl Into<String>) -> Self {
        Self {
            status_text: status_text.into(),
            delay: Duration::from_millis(10),
            echo_correlation: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn echoing_correlation(mut self) -> Self {
        self.echo_correlation = true;
        self
    }

    /// Reply to `.../open` on `.../status`; ignore everything else.
    pub fn into_responder(self) -> DeviceResponder {
        Arc::new(move |command: &OutboundMessage| {
            let base = command.topic.strip_suffix("/open")?;
            let status_topic = format!("{}/status", base);

            let payload = if self.echo_correlation {
                let key = serde_json::from_slice::<serde_json::Value>(&command.payload)
                    .ok()
                    .and_then(|v| v.get("correlation_id").and_then(|id| id.as_str().map(String::from)));
                serde_json::json!({
                    "status": self.status_text,
                    "correlation_id": key,
                })
                .to_string()
                .into_bytes()
            } else {
                self.status_text.clone().into_bytes()
            };

            Some(DeviceReply {
                delay: self.delay,
                message: InboundMessage::new(status_topic, payload),
            })
        })
    }
}

pub struct LoopbackTransport {
    connected: AtomicBool,
    subscriptions: Mutex<HashSet<String>>,
    published: Mutex<Vec<OutboundMessage>>,
    responder: Mutex<Option<DeviceResponder>>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoopbackTransport {
    /// Create a connected transport and its inbound stream.
    pub fn new() -> (Arc<Self>, InboundStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connected: AtomicBool::new(true),
            subscriptions: Mutex::new(HashSet::new()),
            published: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            inbound: tx,
        });
        (transport, rx)
    }

    /// Create a transport with a simulated gate attached.
    pub fn with_gate(gate: SimulatedGate) -> (Arc<Self>, InboundStream) {
        let (transport, rx) = Self::new();
        transport.set_responder(Some(gate.into_responder()));
        (transport, rx)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_responder(&self, responder: Option<DeviceResponder>) {
        *lock(&self.responder) = responder;
    }

    /// Push a message into the inbound stream, as the broker would for a
    /// subscribed topic. Returns `false` if nobody subscribed to the topic.
    pub fn inject(&self, message: InboundMessage) -> bool {
        if !lock(&self.subscriptions).contains(&message.topic) {
            debug!(topic = message.topic.as_str(), "Loopback: no subscriber, dropped");
            return false;
        }
        self.inbound.send(message).is_ok()
    }

    /// Everything published so far, oldest first
    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.published).clone()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        lock(&self.subscriptions).contains(topic)
    }
}

#[async_trait]
impl GateTransport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        lock(&self.subscriptions).insert(topic.to_string());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let responder = lock(&self.responder).clone();
        let reply = responder.and_then(|respond| respond(&message));
        lock(&self.published).push(message);

        if let Some(reply) = reply {
            let inbound = self.inbound.clone();
            let subscribed = lock(&self.subscriptions).contains(&reply.message.topic);
            if subscribed {
                tokio::spawn(async move {
                    tokio::time::sleep(reply.delay).await;
                    let _ = inbound.send(reply.message);
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::QoS;

    fn open_command(topic: &str) -> OutboundMessage {
        OutboundMessage {
            topic: topic.to_string(),
            payload: br#"{"message":"open","correlation_id":"abc"}"#.to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
            expiry: Some(Duration::from_secs(180)),
        }
    }

    #[tokio::test]
    async fn disconnected_transport_rejects_publish() {
        let (transport, _rx) = LoopbackTransport::new();
        transport.set_connected(false);

        let result = transport.publish(open_command("parking/gate/open")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn simulated_gate_replies_on_status_topic() {
        let (transport, mut rx) =
            LoopbackTransport::with_gate(SimulatedGate::new("Gate opened").echoing_correlation());
        transport.subscribe("parking/gate/status").await.unwrap();
        transport.publish(open_command("parking/gate/open")).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.topic, "parking/gate/status");
        let json: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(json["status"], "Gate opened");
        assert_eq!(json["correlation_id"], "abc");
    }

    #[tokio::test]
    async fn inject_requires_subscription() {
        let (transport, _rx) = LoopbackTransport::new();
        assert!(!transport.inject(InboundMessage::new("parking/gate/status", b"x".to_vec())));

        transport.subscribe("parking/gate/status").await.unwrap();
        assert!(transport.inject(InboundMessage::new("parking/gate/status", b"x".to_vec())));
    }
}
