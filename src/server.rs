//! Reusable gate service runtime.
//!
//! Provides [`ServerHandle`] that encapsulates the full lifecycle:
//! metrics, database init, migrations, broker connection, inbound
//! dispatcher, gatekeeper, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::gate::{
    spawn_inbound_dispatcher, CorrelationRegistry, GateProtocol, GateProtocolConfig,
    SharedGateProtocol,
};
use crate::application::ports::GateTransport;
use crate::application::services::{ReservationGatekeeper, SharedGatekeeper};
use crate::config::AppConfig;
use crate::domain::RepositoryProvider;
use crate::infrastructure::transport::{LoopbackTransport, MqttTransport, SimulatedGate};
use crate::infrastructure::{init_database, run_migrations, DatabaseConfig, SeaOrmRepositoryProvider};
use crate::shared::errors::{AppError, InfraError};
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};

// ── Options ────────────────────────────────────────────────────────

/// Where gate commands go
#[derive(Debug, Clone, Default)]
pub enum TransportMode {
    /// The configured MQTT broker
    #[default]
    Mqtt,
    /// An in-process gate answering every command with the given status
    Simulated(SimulatedGate),
}

/// Options for starting the gate service.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Application configuration.
    pub config: AppConfig,
    /// Run database migrations on startup (default: true).
    pub auto_migrate: bool,
    pub transport: TransportMode,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            auto_migrate: true,
            transport: TransportMode::Mqtt,
        }
    }
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running gate service.
///
/// # Examples
///
/// ```rust,no_run
/// use raknah_gate::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     let reservation = handle.gatekeeper.open_gate_for("user-1").await?;
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    /// Opens gates for reservations.
    pub gatekeeper: SharedGatekeeper,
    /// Low-level command exchange.
    pub protocol: SharedGateProtocol,
    /// Repository provider for data access.
    pub repos: Arc<dyn RepositoryProvider>,
    /// The configuration the server was started with.
    pub config: AppConfig,

    transport: Arc<dyn GateTransport>,
    db: DatabaseConnection,
    shutdown: ShutdownCoordinator,
    transport_task: Option<JoinHandle<()>>,
    dispatcher_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Start the gate service with the given options.
    ///
    /// This will:
    /// 1. Install the Prometheus exporter (if enabled)
    /// 2. Connect to the database and run migrations
    /// 3. Connect to the broker (or attach a simulated gate)
    /// 4. Start the inbound dispatcher
    /// 5. Build the gatekeeper
    pub async fn start(opts: ServerOptions) -> Result<Self, AppError> {
        let app_cfg = opts.config;
        app_cfg.validate().map_err(InfraError::from)?;

        info!("Starting Raknah gate service...");

        if app_cfg.metrics.enabled {
            install_metrics_exporter(&app_cfg.metrics.listen)?;
        }

        // ── Database ───────────────────────────────────────────
        let db = init_database(&DatabaseConfig::from(&app_cfg.database)).await?;
        if opts.auto_migrate {
            info!("Running database migrations...");
            run_migrations(&db).await?;
        }
        let repos: Arc<dyn RepositoryProvider> =
            Arc::new(SeaOrmRepositoryProvider::new(db.clone()));

        // ── Shutdown coordinator ───────────────────────────────
        let shutdown = ShutdownCoordinator::new(app_cfg.server.shutdown_timeout_secs);
        let shutdown_signal = shutdown.signal();

        // ── Transport ──────────────────────────────────────────
        let (transport, inbound, transport_task) = match opts.transport {
            TransportMode::Mqtt => {
                let (mqtt, inbound, task) =
                    MqttTransport::start(&app_cfg.mqtt, shutdown_signal.clone());
                let transport: Arc<dyn GateTransport> = mqtt;
                (transport, inbound, Some(task))
            }
            TransportMode::Simulated(gate) => {
                warn!(status = gate.status_text.as_str(), "🧪 Using simulated gate, no broker");
                let (loopback, inbound) = LoopbackTransport::with_gate(gate);
                let transport: Arc<dyn GateTransport> = loopback;
                (transport, inbound, None)
            }
        };

        // ── Gate protocol ──────────────────────────────────────
        let registry = Arc::new(CorrelationRegistry::new());
        let dispatcher_task =
            spawn_inbound_dispatcher(inbound, registry.clone(), shutdown_signal.clone());

        let protocol = Arc::new(GateProtocol::new(
            transport.clone(),
            registry,
            GateProtocolConfig::from(&app_cfg),
        ));
        let gatekeeper = Arc::new(ReservationGatekeeper::new(repos.clone(), protocol.clone()));

        info!(
            topic_prefix = app_cfg.gate.topic_prefix.as_str(),
            response_timeout_ms = app_cfg.gate.response_timeout_ms,
            "🚀 Gate service started"
        );

        Ok(Self {
            gatekeeper,
            protocol,
            repos,
            config: app_cfg,
            transport,
            db,
            shutdown,
            transport_task,
            dispatcher_task,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Wait until the broker connection is up, at most `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let wait = async {
            while !self.transport.is_connected() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down gate service...");

        let Self {
            db,
            shutdown,
            transport_task,
            dispatcher_task,
            ..
        } = self;

        let completed = shutdown
            .shutdown_with_cleanup(|| async move {
                if let Some(task) = transport_task {
                    if let Err(e) = task.await {
                        error!("Transport task panicked: {}", e);
                    }
                }
                if let Err(e) = dispatcher_task.await {
                    error!("Dispatcher task panicked: {}", e);
                }
            })
            .await;
        if !completed {
            warn!("Background tasks did not stop in time");
        }

        // Close database connection
        if let Err(e) = db.close().await {
            warn!("Error closing database connection: {}", e);
        } else {
            info!("✅ Database connection closed");
        }

        info!("👋 Gate service shutdown complete");
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Install the global Prometheus recorder with its scrape listener.
///
/// The recorder can only be installed once per process; later calls are
/// no-ops.
fn install_metrics_exporter(listen: &str) -> Result<(), InfraError> {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| InfraError::Metrics(format!("invalid listen address {listen}: {e}")))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| InfraError::Metrics(e.to_string()))?;

    let _ = INSTALLED.set(());
    info!("📊 Prometheus exporter listening on http://{}/metrics", addr);
    Ok(())
}

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServerHandle::start`]).
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if result.is_err() {
        warn!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParkingSpot, Reservation};

    fn simulated(status: &str) -> ServerOptions {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = Some(1);
        ServerOptions {
            config,
            auto_migrate: true,
            transport: TransportMode::Simulated(SimulatedGate::new(status)),
        }
    }

    #[tokio::test]
    async fn simulated_server_opens_gate() {
        let handle = ServerHandle::start(simulated("Gate opened")).await.unwrap();
        assert!(handle.is_connected());

        handle
            .repos
            .parking_spots()
            .save(ParkingSpot::new(1, "A-01", Some("esp-1".into())))
            .await
            .unwrap();
        handle
            .repos
            .reservations()
            .save(Reservation::new(1, "user-1", 1, "ABC-123"))
            .await
            .unwrap();

        let reservation = handle.gatekeeper.open_gate_for("user-1").await.unwrap();
        assert!(reservation.is_gate_opened);

        let stored = handle.repos.reservations().find_by_id(1).await.unwrap().unwrap();
        assert!(stored.is_gate_opened);

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut opts = simulated("Gate opened");
        opts.config.gate.response_timeout_ms = 0;
        assert!(ServerHandle::start(opts).await.is_err());
    }
}
