//! Intercom Tower - Door Phone Fleet Control
//!
//! Main entry point: wires the components, starts the three topic
//! subscriptions and the liveness sweep, and serves the REST boundary.

use intercom_tower::{
    call_tracker::CallTracker,
    command::CommandService,
    fleet_store::FleetStore,
    history::HistoryService,
    ingest::{run_subscription, Channel, IngestPipeline},
    liveness::LivenessMonitor,
    reconcile::ReconcileEngine,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intercom_tower=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Intercom Tower v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        mqtt = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        namespace = %config.namespace,
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        "Configuration loaded"
    );
    let settings = config.mqtt_settings();

    // Core components
    let fleet = Arc::new(FleetStore::new());
    let calls = Arc::new(CallTracker::new());
    let history = Arc::new(HistoryService::new(config.history_capacity));
    let reconcile = Arc::new(ReconcileEngine::new(fleet.clone()));
    let commands = Arc::new(CommandService::new(
        fleet.clone(),
        history.clone(),
        settings.clone(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        fleet.clone(),
        calls.clone(),
        reconcile,
        history.clone(),
    ));

    // Subscription tasks, one per inbound topic
    let mut listeners = Vec::new();
    for channel in [Channel::Config, Channel::Message, Channel::Life] {
        listeners.push(tokio::spawn(run_subscription(
            pipeline.clone(),
            settings.clone(),
            channel,
        )));
    }

    // Liveness sweep
    let liveness = Arc::new(LivenessMonitor::new(
        fleet.clone(),
        history.clone(),
        config.heartbeat_timeout_secs,
    ));
    liveness.start().await;

    // REST boundary
    let state = AppState {
        config: config.clone(),
        fleet,
        calls,
        history,
        commands,
    };
    let app = web_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cooperative shutdown: stop the sweep, then drop the listeners.
    // Each per-message mutation is atomic, so aborting between messages
    // leaves the maps consistent.
    liveness.stop().await;
    for listener in listeners {
        listener.abort();
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
