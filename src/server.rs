//! Server wiring and runtime
//!
//! Builds the engine from configuration (tenant store, connectors,
//! retry policy, audit logger), mounts the API router, and runs the
//! axum server with graceful shutdown. Shutdown drains the audit queue
//! before the process exits.

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use toolgate_connectors::{
    Connector, EnterpriseDataConnector, QuantumConnector, SourceControlConnector,
};
use toolgate_core::{
    AuditLogger, AuditSink, Engine, EngineConfig, JsonlAuditSink, ResolverConfig, RetryController,
    StaticTenantStore, TenantResolver, ToolRegistry,
};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub audit: Arc<AuditLogger>,
}

/// Build the engine and audit logger from configuration
pub fn build_state(config: &GatewayConfig) -> Result<AppState> {
    let store = StaticTenantStore::from_file(&config.tenants.file)
        .map_err(|e| anyhow::anyhow!("failed to load tenants: {e}"))?;

    let resolver = Arc::new(TenantResolver::new(
        Arc::new(store),
        ResolverConfig {
            ttl: std::time::Duration::from_secs(config.resolver.ttl_secs),
            max_entries: config.resolver.max_entries,
        },
    ));

    let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::new(&config.audit.path));
    let audit = Arc::new(AuditLogger::new(sink, config.audit.buffer_capacity));
    info!(path = %config.audit.path, "Audit log initialized");

    let retry = RetryController::new(config.retry.clone());

    let mut engine = Engine::new(
        Arc::new(ToolRegistry::builtins()),
        resolver,
        retry,
        Arc::clone(&audit),
        EngineConfig {
            default_deadline: config.execution.default_deadline(),
            poll_interval: config.execution.poll_interval(),
        },
    );

    let source_control = SourceControlConnector::new(config.connectors.source_control.clone())
        .map_err(|e| anyhow::anyhow!("source-control connector init failed: {e}"))?;
    engine.register_connector(Arc::new(source_control) as Arc<dyn Connector>);

    let enterprise_data = EnterpriseDataConnector::new(config.connectors.enterprise_data.clone())
        .map_err(|e| anyhow::anyhow!("enterprise-data connector init failed: {e}"))?;
    engine.register_connector(Arc::new(enterprise_data) as Arc<dyn Connector>);

    let quantum = QuantumConnector::new(config.connectors.quantum.clone())
        .map_err(|e| anyhow::anyhow!("quantum connector init failed: {e}"))?;
    engine.register_connector(Arc::new(quantum) as Arc<dyn Connector>);

    info!(tool_count = engine.registry().len(), "Engine initialized");

    Ok(AppState {
        engine: Arc::new(engine),
        audit,
    })
}

/// Build the HTTP router over the shared state
pub fn build_router(state: AppState) -> Router {
    crate::api::api_router(state).layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Run the gateway server
pub async fn run() -> Result<()> {
    info!("Starting Toolgate v{}", env!("CARGO_PKG_VERSION"));

    let config = crate::config::load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let state = build_state(&config)?;
    let audit = Arc::clone(&state.audit);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Draining audit queue...");
    audit.shutdown().await;

    info!("Toolgate shutdown complete");
    Ok(())
}
