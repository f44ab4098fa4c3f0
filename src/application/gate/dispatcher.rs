//! Inbound dispatcher
//!
//! Single consumer of the transport's inbound stream. Each message is handed
//! to the correlation registry; nothing here awaits a waiter, so one slow
//! gate never delays reports for another.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::registry::{CorrelationRegistry, Delivery};
use crate::application::ports::InboundStream;
use crate::shared::shutdown::ShutdownSignal;

/// Start routing inbound messages to waiters.
///
/// The task ends when the stream closes or shutdown is signalled.
pub fn spawn_inbound_dispatcher(
    mut inbound: InboundStream,
    registry: Arc<CorrelationRegistry>,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📨 Inbound dispatcher started");

        loop {
            let stop = shutdown.notified();
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        debug!("Inbound stream closed");
                        break;
                    };
                    match registry.deliver(&message) {
                        Delivery::Resolved { key, outcome } => {
                            debug!(correlation_key = %key, outcome = %outcome, "Gate report matched");
                            metrics::counter!("gate_reports_total", "result" => "matched").increment(1);
                        }
                        Delivery::Unmatched => {
                            debug!(topic = message.topic.as_str(), "Gate report without waiter");
                            metrics::counter!("gate_reports_total", "result" => "unmatched").increment(1);
                        }
                        Delivery::IgnoredRetained => {
                            debug!(topic = message.topic.as_str(), "Retained gate report ignored");
                            metrics::counter!("gate_reports_total", "result" => "retained").increment(1);
                        }
                    }
                }
                _ = stop.wait() => break,
            }
        }

        info!("📨 Inbound dispatcher stopped");
    })
}
