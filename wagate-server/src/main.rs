//! wagate-server binary
//!
//! Boots the session engine, binds the HTTP surface and warms previously
//! paired sessions in the background.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wagate::backend::{MemoryStore, PgStore};
use wagate::base::constants::HEARTBEAT_INTERVAL;
use wagate::base::Store;
use wagate::upstream::sim::SimUpstream;
use wagate::{EngineConfig, EventBus, Heartbeat, Supervisor};
use wagate_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize logging
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::from_default_env().add_directive("wagate=info".parse()?))
    .init();

  let config = ServerConfig::from_env()?;

  let store: Arc<dyn Store> = match &config.database_url {
    Some(url) => {
      info!("connecting to PostgresSQL backend");
      let store = PgStore::connect(url).await?;
      store.ensure_schema().await?;
      Arc::new(store)
    }
    None => {
      warn!("DATABASE_URL not set, using in-memory store (sessions do not survive restarts)");
      Arc::new(MemoryStore::new())
    }
  };

  // The real WhatsApp transport is linked by the deployment; the simulator
  // keeps a bare checkout runnable end to end
  let upstream = Arc::new(SimUpstream::new());
  let bus = Arc::new(EventBus::new());
  let supervisor = Supervisor::new(store.clone(), upstream, bus.clone(), EngineConfig::default())?;

  let heartbeat = Arc::new(Heartbeat::new(bus.clone(), HEARTBEAT_INTERVAL));
  let heartbeat_handle = heartbeat.clone().start();

  let state = AppState {
    registry: supervisor.registry(),
    supervisor: supervisor.clone(),
    store,
    bus,
    secret_key: config.secret_key.clone(),
    socket_enabled: config.socket_enabled,
  };
  let app = build_router(state, &config.api_prefix);

  let addr = format!("0.0.0.0:{}", config.port);
  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!("wagate-server listening on {addr} (prefix {})", config.api_prefix);

  // Warm after the listener is bound so readiness is not delayed by slow
  // upstreams
  let warm_supervisor = supervisor.clone();
  tokio::spawn(async move {
    match warm_supervisor.warm_sessions().await {
      Ok(report) => info!(
        total = report.total,
        attempted = report.attempted,
        connected = report.connected,
        failed = report.failed,
        "session warm-up finished"
      ),
      Err(e) => warn!(error = %e, "session warm-up failed"),
    }
  });

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  // Cleanup: release every session lock and close the sockets before exit
  supervisor.shutdown().await;
  heartbeat.shutdown();
  let _ = tokio::time::timeout(std::time::Duration::from_secs(5), heartbeat_handle).await;
  info!("wagate-server stopped");
  Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };
  #[cfg(unix)]
  let terminate = async {
    if let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
      signal.recv().await;
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
  info!("received shutdown signal, stopping server...");
}
