//! Raknah gate service - CLI
//!
//! Headless runner suitable for deployment as a systemd service, Docker
//! container, or standalone process.
//!
//! ```sh
//! # Run with default config (~/.config/raknah-gate/config.toml)
//! raknah-gate
//!
//! # Custom config path
//! raknah-gate --config /etc/raknah-gate/config.toml run
//!
//! # Validate config without starting
//! raknah-gate check
//!
//! # Open the gate once for a user (field testing)
//! raknah-gate open-gate --user 42
//! raknah-gate open-gate --user 42 --simulate "Gate opened"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use raknah_gate::config::{config_path_from_env, AppConfig};
use raknah_gate::infrastructure::SimulatedGate;
use raknah_gate::server::{init_tracing, ServerHandle, ServerOptions, TransportMode};

/// Raknah gate service: opens parking gates for reservations over MQTT.
#[derive(Parser, Debug)]
#[command(
    name = "raknah-gate",
    version,
    about = "Parking gate control service",
    long_about = "Raknah gate service: sends open commands to parking gate \
                  controllers over MQTT and records the outcome on the reservation.\n\n\
                  Default config: ~/.config/raknah-gate/config.toml \
                  (override with RAKNAH_GATE_CONFIG)"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Skip database migrations on startup.
    #[arg(long, global = true)]
    no_migrate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service until SIGINT/SIGTERM (default).
    Run,
    /// Validate the configuration file and exit.
    Check,
    /// Open the gate once for a user's pending reservation.
    OpenGate {
        /// User whose reservation to use.
        #[arg(long)]
        user: String,

        /// Answer with this status from an in-process gate instead of the broker.
        #[arg(long)]
        simulate: Option<String>,

        /// How long to wait for the broker connection, in seconds.
        #[arg(long, default_value_t = 10)]
        connect_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(config_path_from_env);

    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let (Some(e), Some(Command::Check)) = (&load_error, &cli.command) {
        eprintln!("❌ Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    // Init tracing first so subsequent logs are formatted properly
    init_tracing(&config);
    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
        }
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            if let Err(e) = config.validate() {
                eprintln!("❌ Invalid configuration: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            println!("   Config file : {}", config_path.display());
            println!("   Broker      : {}:{} (tls: {})", config.mqtt.host, config.mqtt.port, config.mqtt.use_tls);
            println!("   Topics      : {}/...", config.gate.topic_prefix);
            println!("   Timeout     : {} ms", config.gate.response_timeout_ms);
            println!("   Database    : {}", config.database.url);
            println!("   Log level   : {}", config.logging.level);
            Ok(())
        }
        Command::Run => {
            let handle = ServerHandle::start(ServerOptions {
                config,
                auto_migrate: !cli.no_migrate,
                transport: TransportMode::Mqtt,
            })
            .await?;

            // Install OS signal handlers (SIGTERM, SIGINT)
            handle.install_signal_handler();
            info!("🚀 Press Ctrl+C to shutdown gracefully.");

            handle.shutdown_signal().wait().await;
            handle.shutdown().await;
            Ok(())
        }
        Command::OpenGate {
            user,
            simulate,
            connect_timeout,
        } => {
            let transport = match simulate {
                Some(status) => TransportMode::Simulated(SimulatedGate::new(status)),
                None => TransportMode::Mqtt,
            };
            let handle = ServerHandle::start(ServerOptions {
                config,
                auto_migrate: !cli.no_migrate,
                transport,
            })
            .await?;

            if !handle.wait_connected(Duration::from_secs(connect_timeout)).await {
                warn!("Broker not connected after {}s", connect_timeout);
            }

            let result = handle.gatekeeper.open_gate_for(&user).await;
            handle.shutdown().await;

            match result {
                Ok(reservation) => {
                    println!(
                        "✅ Gate opened for reservation {} (spot {})",
                        reservation.id, reservation.parking_spot_id
                    );
                    Ok(())
                }
                Err(e) => {
                    eprintln!("❌ {}: {}", e.code(), e);
                    std::process::exit(2);
                }
            }
        }
    }
}
