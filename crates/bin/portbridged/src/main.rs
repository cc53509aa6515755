//! # portbridged
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialize tracing
//! - Open the `SQLite` pool and run migrations
//! - Construct the device transport, hub connector and backup store
//! - Construct application services, injecting adapters via port traits
//! - Spawn the background loops (link events, hub events, scheduler)
//! - Build the axum router and serve until SIGINT/SIGTERM
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use portbridge_adapter_backup_fs::FsBackupManager;
use portbridge_adapter_device_http_ws::{HttpWsDeviceApi, LanScanner};
use portbridge_adapter_http_axum::state::AppState;
use portbridge_adapter_hub_ws::HubConnector;
use portbridge_adapter_storage_sqlite_sqlx::{
    Config as DbConfig, SqliteDeviceRepository, SqlitePortRepository,
};
use portbridge_app::event_bus::InProcessEventBus;
use portbridge_app::services::backup_service::BackupService;
use portbridge_app::services::bridge::Bridge;
use portbridge_app::services::device_registry::DeviceRegistry;
use portbridge_app::services::hub_router::HubEventRouter;
use portbridge_app::services::port_sync::PortSyncEngine;
use portbridge_app::services::scheduler::Scheduler;
use portbridge_domain::entity::EntityNamespace;

use crate::config::Config;

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database
    let db = DbConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;

    // Repositories
    let devices = Arc::new(SqliteDeviceRepository::new(db.pool().clone()));
    let ports = Arc::new(SqlitePortRepository::new(db.pool().clone()));

    // Event bus
    let events = Arc::new(InProcessEventBus::new(EVENT_BUS_CAPACITY));

    // Adapters
    let api = Arc::new(HttpWsDeviceApi::new(config.device.clone())?);
    let (hub_tx, hub_rx) = mpsc::unbounded_channel();
    let hub = Arc::new(HubConnector::new(config.hub.clone(), hub_tx)?);
    let scanner = LanScanner::new(config.scan.clone())?;
    let store = FsBackupManager::new(Arc::clone(&api), config.backup.clone());

    // Services
    let sync = Arc::new(PortSyncEngine::new(
        Arc::clone(&hub),
        Arc::clone(&devices),
        Arc::clone(&ports),
        EntityNamespace::new(&config.hub.entity_namespace),
    ));
    let registry = Arc::new(DeviceRegistry::new(
        api,
        Arc::clone(&devices),
        Arc::clone(&ports),
        Arc::clone(&sync),
        Arc::clone(&events),
        config.device.link_settings(),
    ));
    let backups = Arc::new(BackupService::new(
        store,
        Arc::clone(&devices),
        Arc::clone(&registry),
        Arc::clone(&events),
    ));
    let router = HubEventRouter::new(
        Arc::clone(&registry),
        Arc::clone(&sync),
        Arc::clone(&events),
        config.hub.auto_sync,
    );
    let scheduler = Scheduler::new(Arc::clone(&backups), config.schedule.clone());
    let bridge = Arc::new(Bridge::new(
        Arc::clone(&registry),
        sync,
        backups,
        devices,
        ports,
        scanner,
        events,
    ));

    // Background loops
    let link_events = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.run_events().await })
    };
    let hub_events = tokio::spawn(async move { router.run(hub_rx).await });

    hub.start().await;
    bridge.start().await?;

    let cancel = CancellationToken::new();
    let schedule = scheduler.spawn(cancel.clone());

    // HTTP
    let app = portbridge_adapter_http_axum::router::build(AppState::from_arc(Arc::clone(&bridge)));
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "portbridged listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    cancel.cancel();
    if let Err(err) = schedule.await {
        tracing::warn!(%err, "scheduler task ended abnormally");
    }
    bridge.shutdown().await;
    link_events.abort();
    hub_events.abort();
    db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(%err, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
