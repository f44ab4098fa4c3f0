//! MQTT transport
//!
//! Owns the process-wide broker connection. A supervised task polls the
//! `rumqttc` event loop for the lifetime of the process:
//!
//! - CONNACK marks the transport connected and re-issues every remembered
//!   subscription,
//! - incoming PUBLISH packets are forwarded to the inbound stream,
//! - any connection error marks it disconnected; the next poll after
//!   `reconnect_delay` reconnects,
//! - shutdown sends DISCONNECT and ends the task.
//!
//! Requests use the non-blocking `try_*` client calls so a full request
//! queue surfaces as an error instead of stalling a gate command.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::ports::{
    GateTransport, InboundMessage, InboundStream, OutboundMessage, QoS, TransportError,
};
use crate::config::MqttSection;
use crate::shared::shutdown::ShutdownSignal;

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build client options from the `[mqtt]` config section.
pub fn mqtt_options(config: &MqttSection) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.trim(), config.host.trim(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_start(config.clean_session);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

/// Broker connection shared by every gate command
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

impl MqttTransport {
    /// Create the client and spawn the supervised event loop.
    ///
    /// Returns the transport, the single inbound stream, and the supervisor
    /// handle (finishes after shutdown).
    pub fn start(
        config: &MqttSection,
        shutdown: ShutdownSignal,
    ) -> (Arc<Self>, InboundStream, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), config.request_capacity);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            client: client.clone(),
            connected: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
        });

        info!(
            host = config.host.as_str(),
            port = config.port,
            client_id = config.client_id.as_str(),
            tls = config.use_tls,
            "Starting MQTT transport"
        );

        let supervisor = Supervisor {
            eventloop,
            client,
            connected: transport.connected.clone(),
            subscriptions: transport.subscriptions.clone(),
            inbound: inbound_tx,
            reconnect_delay: config.reconnect_delay(),
        };
        let handle = tokio::spawn(supervisor.run(shutdown));

        (transport, inbound_rx, handle)
    }
}

#[async_trait]
impl GateTransport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !lock(&self.subscriptions).insert(topic.to_string()) {
            return Ok(());
        }

        if let Err(e) = self.client.try_subscribe(topic, MqttQoS::AtLeastOnce) {
            lock(&self.subscriptions).remove(topic);
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }

        info!(topic, "Subscribed to gate status topic");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let properties = PublishProperties {
            message_expiry_interval: message
                .expiry
                .map(|ttl| u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX)),
            ..Default::default()
        };

        self.client
            .try_publish_with_properties(
                message.topic.clone(),
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload,
                properties,
            )
            .map_err(|e| TransportError::Publish {
                topic: message.topic,
                reason: e.to_string(),
            })
    }
}

struct Supervisor {
    eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    reconnect_delay: Duration,
}

impl Supervisor {
    async fn run(mut self, shutdown: ShutdownSignal) {
        info!("📡 MQTT supervisor started");

        loop {
            let stop = shutdown.notified();
            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(packet)) => self.on_packet(packet),
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        self.connected.store(false, Ordering::SeqCst);
                        warn!(
                            error = %e,
                            "MQTT disconnected. Reconnecting in {} seconds...",
                            self.reconnect_delay.as_secs()
                        );
                        let stop = shutdown.notified();
                        tokio::select! {
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                            _ = stop.wait() => break,
                        }
                    }
                },
                _ = stop.wait() => break,
            }
        }

        self.disconnect().await;
        info!("📡 MQTT supervisor stopped");
    }

    fn on_packet(&self, packet: Packet) {
        match packet {
            Packet::ConnAck(ack) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(code = ?ack.code, session_present = ack.session_present, "MQTT connected");
                self.resubscribe();
            }
            Packet::Publish(publish) => {
                let message = InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                };
                debug!(topic = message.topic.as_str(), bytes = message.payload.len(), "MQTT message received");
                if self.inbound.send(message).is_err() {
                    warn!("Inbound stream closed, dropping MQTT message");
                }
            }
            Packet::Disconnect(disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(reason = ?disconnect.reason_code, "Broker sent DISCONNECT");
            }
            _ => {}
        }
    }

    fn resubscribe(&self) {
        let topics: Vec<String> = lock(&self.subscriptions).iter().cloned().collect();
        for topic in topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), MqttQoS::AtLeastOnce) {
                warn!(topic = topic.as_str(), error = %e, "Re-subscribe failed");
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if self.client.try_disconnect().is_err() {
            return;
        }
        // Drive the loop until DISCONNECT is flushed and the connection closes
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while self.eventloop.poll().await.is_ok() {}
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let config = MqttSection {
            host: "broker.local".into(),
            port: 8883,
            client_id: " gate-1 ".into(),
            keep_alive_secs: 45,
            ..MqttSection::default()
        };
        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.client_id(), "gate-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), MqttQoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), MqttQoS::AtMostOnce);
    }

    #[tokio::test]
    async fn starts_disconnected_and_rejects_publish() {
        let config = MqttSection {
            host: "127.0.0.1".into(),
            port: 1,
            ..MqttSection::default()
        };
        let shutdown = ShutdownSignal::new();
        let (transport, _inbound, handle) = MqttTransport::start(&config, shutdown.clone());

        assert!(!transport.is_connected());
        let result = transport
            .publish(OutboundMessage {
                topic: "parking/gate/open".into(),
                payload: b"{}".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
                expiry: Some(Duration::from_secs(180)),
            })
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }
}
