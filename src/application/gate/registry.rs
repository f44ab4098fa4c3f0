//! Correlation registry
//!
//! Pairs in-flight gate commands with the status reports arriving on the
//! single shared inbound stream.
//!
//! ```text
//! GateProtocol ── register(key, topic) ──► pending: DashMap<key, PendingCommand>
//!      │                                   by_topic: DashMap<topic, key>
//!      │                                          ▲
//!      └── await_outcome(waiter, deadline)        │
//!                                                 │
//! InboundDispatcher ── deliver(message) ──────────┘
//! ```
//!
//! Whoever removes the `pending` entry owns the resolution: `deliver`
//! removes it and sends the outcome, the deadline path removes it and
//! reports `Timeout`. The loser of that race is a no-op.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::ports::InboundMessage;
use crate::domain::gate::{CorrelationKey, GateOutcome, StatusReport};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("correlation key {0} is already registered")]
    DuplicateKey(CorrelationKey),
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Resolved {
        key: CorrelationKey,
        outcome: GateOutcome,
    },
    /// No live waiter matched (unsolicited, late, or another process's reply)
    Unmatched,
    /// Broker replay of a retained status; never current
    IgnoredRetained,
}

struct PendingCommand {
    status_topic: String,
    registered_at: Instant,
    sender: oneshot::Sender<GateOutcome>,
}

/// Single-resolution slot for one in-flight command.
///
/// Dropping an unsettled waiter withdraws it from the registry, so an
/// abandoned caller never leaves a stale entry behind.
pub struct Waiter<'a> {
    registry: &'a CorrelationRegistry,
    key: CorrelationKey,
    receiver: oneshot::Receiver<GateOutcome>,
    settled: bool,
}

impl Waiter<'_> {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.settled && self.registry.withdraw(&self.key) {
            debug!(correlation_key = %self.key, "Abandoned waiter withdrawn");
        }
    }
}

/// Thread-safe map of in-flight gate commands
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationKey, PendingCommand>,
    /// Latest key registered per status topic, for reports without a key
    by_topic: DashMap<String, CorrelationKey>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a waiter for `key`, expecting its report on `status_topic`.
    pub fn register(
        &self,
        key: CorrelationKey,
        status_topic: &str,
    ) -> Result<Waiter<'_>, RegistryError> {
        let (sender, receiver) = oneshot::channel();

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(PendingCommand {
                    status_topic: status_topic.to_string(),
                    registered_at: Instant::now(),
                    sender,
                });
            }
        }
        self.by_topic.insert(status_topic.to_string(), key.clone());

        debug!(correlation_key = %key, status_topic, "Waiter registered");

        Ok(Waiter {
            registry: self,
            key,
            receiver,
            settled: false,
        })
    }

    /// Route one inbound message to its waiter.
    ///
    /// A report carrying a correlation key resolves exactly that key (and
    /// only if it arrived on the key's status topic). A report without one
    /// resolves the command registered for its topic. Never blocks.
    pub fn deliver(&self, message: &InboundMessage) -> Delivery {
        if message.retained {
            debug!(topic = message.topic.as_str(), "Ignoring retained status message");
            return Delivery::IgnoredRetained;
        }

        let report = StatusReport::parse(&message.payload);

        let key = match report.correlation_key.clone() {
            Some(key) => key,
            None => match self.by_topic.get(&message.topic).map(|k| k.value().clone()) {
                Some(key) => key,
                None => {
                    debug!(
                        topic = message.topic.as_str(),
                        text = report.text.as_str(),
                        "Dropping status message with no waiter"
                    );
                    return Delivery::Unmatched;
                }
            },
        };

        let Some((key, pending)) = self
            .pending
            .remove_if(&key, |_, p| p.status_topic == message.topic)
        else {
            debug!(
                correlation_key = %key,
                topic = message.topic.as_str(),
                "Dropping late or foreign status message"
            );
            return Delivery::Unmatched;
        };
        self.by_topic.remove_if(&pending.status_topic, |_, k| *k == key);

        let outcome = report.outcome();
        info!(
            correlation_key = %key,
            topic = message.topic.as_str(),
            outcome = %outcome,
            elapsed_ms = pending.registered_at.elapsed().as_millis() as u64,
            "Gate status correlated"
        );

        if pending.sender.send(outcome.clone()).is_err() {
            warn!(correlation_key = %key, "Waiter went away before its outcome arrived");
        }

        Delivery::Resolved { key, outcome }
    }

    /// Suspend until `waiter` is resolved or `deadline` elapses.
    pub async fn await_outcome(&self, mut waiter: Waiter<'_>, deadline: Duration) -> GateOutcome {
        debug_assert!(std::ptr::eq(self, waiter.registry));

        let outcome = match timeout(deadline, &mut waiter.receiver).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an outcome: entry was withdrawn elsewhere
            Ok(Err(_)) => GateOutcome::Timeout,
            Err(_) => {
                if self.withdraw(&waiter.key) {
                    warn!(
                        correlation_key = %waiter.key,
                        deadline_ms = deadline.as_millis() as u64,
                        "Gate did not answer before the deadline"
                    );
                    GateOutcome::Timeout
                } else {
                    // A delivery removed the entry first and is sending now
                    (&mut waiter.receiver).await.unwrap_or(GateOutcome::Timeout)
                }
            }
        };

        waiter.settled = true;
        outcome
    }

    /// Withdraw a waiter whose command never went out. Returns `false` if
    /// it was already resolved or removed.
    pub fn cancel(&self, key: &CorrelationKey) -> bool {
        self.withdraw(key)
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn withdraw(&self, key: &CorrelationKey) -> bool {
        match self.pending.remove(key) {
            Some((key, pending)) => {
                self.by_topic.remove_if(&pending.status_topic, |_, k| *k == key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "parking/gate/status";

    fn status(text: &str) -> InboundMessage {
        InboundMessage::new(STATUS, text.as_bytes().to_vec())
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let _waiter = registry.register(key.clone(), STATUS).unwrap();

        let err = registry.register(key.clone(), STATUS).err();
        assert_eq!(err, Some(RegistryError::DuplicateKey(key)));
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn keyed_report_resolves_exactly_once() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let waiter = registry.register(key.clone(), STATUS).unwrap();

        let msg = status(r#"{"status":"Gate opened","correlation_id":"k1"}"#);
        assert_eq!(
            registry.deliver(&msg),
            Delivery::Resolved {
                key: key.clone(),
                outcome: GateOutcome::Opened
            }
        );
        // Duplicate (QoS 1 redelivery) is a no-op
        assert_eq!(registry.deliver(&msg), Delivery::Unmatched);

        let outcome = registry
            .await_outcome(waiter, Duration::from_millis(100))
            .await;
        assert_eq!(outcome, GateOutcome::Opened);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn unkeyed_report_resolves_waiter_on_topic() {
        let registry = CorrelationRegistry::new();
        let waiter = registry.register(CorrelationKey::from("k1"), STATUS).unwrap();

        assert!(matches!(
            registry.deliver(&status("No car detected")),
            Delivery::Resolved {
                outcome: GateOutcome::NoCarDetected,
                ..
            }
        ));

        let outcome = registry
            .await_outcome(waiter, Duration::from_millis(100))
            .await;
        assert_eq!(outcome, GateOutcome::NoCarDetected);
    }

    #[test]
    fn report_without_waiter_is_dropped() {
        let registry = CorrelationRegistry::new();
        assert_eq!(registry.deliver(&status("Gate opened")), Delivery::Unmatched);
    }

    #[test]
    fn retained_report_is_ignored() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let _waiter = registry.register(key.clone(), STATUS).unwrap();

        let mut msg = status("Gate opened");
        msg.retained = true;
        assert_eq!(registry.deliver(&msg), Delivery::IgnoredRetained);
        assert!(registry.is_pending(&key));
    }

    #[test]
    fn keyed_report_on_wrong_topic_does_not_resolve() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let _waiter = registry.register(key.clone(), "parking/gate/esp-1/status").unwrap();

        let msg = InboundMessage::new(
            "parking/gate/esp-2/status",
            br#"{"status":"Gate opened","correlation_id":"k1"}"#.to_vec(),
        );
        assert_eq!(registry.deliver(&msg), Delivery::Unmatched);
        assert!(registry.is_pending(&key));
    }

    #[tokio::test]
    async fn deadline_removes_waiter_and_late_report_is_dropped() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let waiter = registry.register(key.clone(), STATUS).unwrap();

        let started = Instant::now();
        let outcome = registry
            .await_outcome(waiter, Duration::from_millis(30))
            .await;
        assert_eq!(outcome, GateOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!registry.is_pending(&key));

        assert_eq!(registry.deliver(&status("Gate opened")), Delivery::Unmatched);
    }

    #[tokio::test]
    async fn outcome_delivered_before_await_is_kept() {
        let registry = CorrelationRegistry::new();
        let waiter = registry.register(CorrelationKey::from("k1"), STATUS).unwrap();

        registry.deliver(&status("servo jammed"));

        let outcome = registry.await_outcome(waiter, Duration::ZERO).await;
        assert_eq!(outcome, GateOutcome::HardwareError("servo jammed".into()));
    }

    #[tokio::test]
    async fn delivery_claimed_before_deadline_wins_even_if_sent_after() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let waiter = registry.register(key.clone(), STATUS).unwrap();

        // Same removal `deliver` performs, with the send held back until
        // after the deadline has fired.
        let (_, pending) = registry.pending.remove(&key).unwrap();
        registry.by_topic.remove_if(&pending.status_topic, |_, k| *k == key);
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            pending.sender.send(GateOutcome::Opened).is_ok()
        });

        let started = Instant::now();
        let outcome = registry
            .await_outcome(waiter, Duration::from_millis(20))
            .await;
        assert_eq!(outcome, GateOutcome::Opened);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(sender.await.unwrap());

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.deliver(&status("Gate opened")), Delivery::Unmatched);
    }

    #[test]
    fn dropping_waiter_withdraws_it() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let waiter = registry.register(key.clone(), STATUS).unwrap();
        drop(waiter);

        assert!(!registry.is_pending(&key));
        assert_eq!(registry.deliver(&status("Gate opened")), Delivery::Unmatched);
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = CorrelationRegistry::new();
        let key = CorrelationKey::from("k1");
        let _waiter = registry.register(key.clone(), STATUS).unwrap();

        assert!(registry.cancel(&key));
        assert!(!registry.cancel(&key));
    }

    #[tokio::test]
    async fn independent_waiters_do_not_interfere() {
        let registry = std::sync::Arc::new(CorrelationRegistry::new());
        let topics: Vec<String> = (0..8)
            .map(|i| format!("parking/gate/esp-{}/status", i))
            .collect();

        let mut handles = Vec::new();
        for (i, topic) in topics.iter().enumerate() {
            let registry = registry.clone();
            let topic = topic.clone();
            handles.push(tokio::spawn(async move {
                let waiter = registry
                    .register(CorrelationKey::from(format!("k{}", i)), &topic)
                    .unwrap();
                registry.await_outcome(waiter, Duration::from_secs(2)).await
            }));
        }

        while registry.pending_count() < topics.len() {
            tokio::task::yield_now().await;
        }

        // Answer in reverse order; odd gates report no car
        for (i, topic) in topics.iter().enumerate().rev() {
            let text = if i % 2 == 0 { "Gate opened" } else { "No car" };
            registry.deliver(&InboundMessage::new(topic.as_str(), text.as_bytes().to_vec()));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let expected = if i % 2 == 0 {
                GateOutcome::Opened
            } else {
                GateOutcome::NoCarDetected
            };
            assert_eq!(handle.await.unwrap(), expected);
        }
        assert_eq!(registry.pending_count(), 0);
    }
}
