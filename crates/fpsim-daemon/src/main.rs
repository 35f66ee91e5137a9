//! fpsim Daemon - Main entry point
//!
//! Serves one simulated fingerprint sensor over a Unix socket.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fpsim_daemon::{DaemonConfig, IpcServer, SensorService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fpsim_daemon=info,fpsim_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fpsim daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = DaemonConfig::default_path();
    let config = DaemonConfig::load_or_create(&config_path)?;
    config.ensure_directories()?;
    info!(
        "Sensor {} ({:?}), {:?} single-flight",
        config.sensor.sensor_id, config.sensor.sensor_type, config.single_flight
    );

    let service = Arc::new(SensorService::new(&config)?);
    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&service));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    let served = ipc_server.run_until(shutdown).await;
    if let Err(e) = &served {
        error!("IPC server error: {}", e);
    }

    info!("Daemon shutting down");
    service.shutdown();

    served.map_err(Into::into)
}
