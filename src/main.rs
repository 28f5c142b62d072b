//! OCPP Central System
//!
//! OCPP 1.6 WebSocket server that boots, configures and supervises the
//! charge points listed in the configuration file.
//!
//! ```bash
//! # Run with default config (~/.config/ocpp-central/config.toml)
//! ocpp-central
//!
//! # Custom config path
//! ocpp-central --config /etc/ocpp-central/config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ocpp_central::application::{
    create_command_sender, CentralSystem, ChargePoint, SessionRegistry,
};
use ocpp_central::config::{ChargePointConfig, LoggingConfig, OcppConfig};
use ocpp_central::interfaces::ws::OcppServer;
use ocpp_central::support::clock::system_clock;
use ocpp_central::support::shutdown::{ShutdownCoordinator, ShutdownSignal};
use ocpp_central::{default_config_path, AppConfig};

/// OCPP 1.6 Central System for EV charge points.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-central",
    version,
    about = "OCPP 1.6 Central System for EV charge points",
    long_about = "WebSocket server that boots, configures and supervises \
                  OCPP 1.6 charge points.\n\n\
                  Default config: ~/.config/ocpp-central/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the WebSocket listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if cli.check {
        if let Some(e) = load_error {
            eprintln!("Invalid configuration {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
        println!("Configuration OK: {}", config_path.display());
        println!("   WS address    : {}", config.server.address());
        println!("   Charge points : {}", config.charge_points.len());
        return Ok(());
    }

    init_tracing(&config.logging);
    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) => error!("Failed to load config: {}. Using defaults.", e),
    }

    info!("Starting OCPP Central System...");

    // ── Core services ──────────────────────────────────────────
    let session_registry = SessionRegistry::shared();
    let command_sender = create_command_sender(session_registry.clone());
    let central_system = CentralSystem::shared(
        command_sender.clone(),
        config.engine_settings(),
        system_clock(),
    );

    let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout());
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    for cp_config in &config.charge_points {
        match central_system.register(&cp_config.id) {
            Ok(cp) => {
                tokio::spawn(supervise(
                    cp,
                    cp_config.clone(),
                    config.ocpp.clone(),
                    shutdown_signal.clone(),
                ));
            }
            Err(e) => error!(charge_point_id = cp_config.id.as_str(), error = %e, "Skipping charge point"),
        }
    }

    let server = OcppServer::new(
        config.server.clone(),
        central_system.clone(),
        session_registry.clone(),
        command_sender.clone(),
    )
    .with_shutdown(shutdown_signal.clone());

    let ws_result = tokio::spawn(async move { server.run().await });

    info!("Server started. Press Ctrl+C to shutdown gracefully.");

    match ws_result.await {
        Ok(Ok(())) => info!("WebSocket server stopped"),
        Ok(Err(e)) => {
            error!("WebSocket server error: {}", e);
            shutdown_signal.trigger();
        }
        Err(e) => error!("WebSocket server task panicked: {}", e),
    }

    shutdown
        .shutdown_with_cleanup(|| async {
            for id in central_system.charge_point_ids() {
                command_sender.cleanup_charge_point(&id);
                central_system.on_link_disconnected(&id).await;
            }
        })
        .await;

    info!("OCPP Central System shutdown complete");
    Ok(())
}

/// Waits for a configured charge point, runs the setup handshake, then
/// starts the connector watchdogs and the reboot monitor.
async fn supervise(
    cp: Arc<ChargePoint>,
    cp_config: ChargePointConfig,
    ocpp: OcppConfig,
    shutdown: ShutdownSignal,
) {
    let id = cp.id().to_string();
    let options = cp_config.setup_options();

    let connected = tokio::select! {
        _ = shutdown.wait() => return,
        result = cp.wait_connected(ocpp.connect_timeout()) => result,
    };
    if let Err(e) = connected {
        warn!(charge_point_id = id.as_str(), error = %e, "Charge point never connected");
        return;
    }

    if let Err(e) = cp.setup(&options).await {
        error!(charge_point_id = id.as_str(), error = %e, "Setup failed");
    }

    let capabilities = cp.capabilities().await;
    for connector_id in &cp_config.connectors {
        if !capabilities.has_connector(*connector_id) {
            warn!(
                charge_point_id = id.as_str(),
                connector_id = *connector_id,
                number_of_connectors = capabilities.number_of_connectors,
                "Invalid connector, skipping"
            );
            continue;
        }

        let connector = cp.connector(*connector_id).await;
        if cp_config.remote_start {
            if let Err(e) = connector
                .enable_remote_start(cp_config.remote_id_tag.as_deref())
                .await
            {
                warn!(charge_point_id = id.as_str(), error = %e, "Failed to enable remote start");
            }
        }

        let watched = connector.clone();
        let interval = ocpp.watchdog_interval();
        let signal = shutdown.clone();
        tokio::spawn(async move { watched.watch_dog(interval, signal).await });

        if let Err(e) = connector.initialized().await {
            warn!(
                charge_point_id = id.as_str(),
                connector_id = *connector_id,
                error = %e,
                "Connector did not report its status"
            );
        }
    }

    info!(charge_point_id = id.as_str(), "Charge point supervised");
    cp.monitor_reboot(options, shutdown).await;
}
