//! Cascade API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cascade_api::error::AppError;
use cascade_api::state::AppState;
use cascade_core::clock::SystemClock;
use cascade_core::rng::SystemRng;
use cascade_dispatch::{DispatchConfig, IntervalScheduler};
use cascade_orders::application::handlers::{EXPIRE_PENDING_ORDERS, SYNC_INVENTORY};
use cascade_orders::application::lifecycle::saga_config;
use cascade_orders::application::services::OrderSettings;

const SERVICE_NAME: &str = "cascade-api";
const EXPIRY_PERIOD: Duration = Duration::from_secs(60);
const INVENTORY_SYNC_PERIOD: Duration = Duration::from_secs(300);

/// Builds an OTLP span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracer_provider() -> Result<Option<SdkTracerProvider>, AppError> {
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_none() {
        return Ok(None);
    }
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| AppError::Telemetry(e.to_string()))?;
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build();
    Ok(Some(provider))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber, exporting spans when configured.
    let tracer_provider = init_tracer_provider()?;
    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .init();

    info!("Starting Cascade API server");

    // Read configuration from environment.
    let dispatch_config = DispatchConfig::from_env()?;
    let saga_config = saga_config()?;
    let order_settings = OrderSettings::from_env()?;
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());

    // Build application state. A misconfigured handler table stops startup.
    let app_state = AppState::assemble(
        Arc::new(SystemClock),
        Box::new(SystemRng::new()),
        order_settings,
        dispatch_config,
        saga_config,
    )?;

    // Background work: cron triggers and the inactivity sweep.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = IntervalScheduler::new(app_state.dispatcher.clone())
        .every(EXPIRE_PENDING_ORDERS, EXPIRY_PERIOD)
        .every(SYNC_INVENTORY, INVENTORY_SYNC_PERIOD);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let sweeper_task = Arc::clone(&app_state.tracker).spawn_sweeper(shutdown_rx);

    // Build router.
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = cascade_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server.
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| AppError::Address(format!("{host}:{port}: {e}")))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work; in-flight cascades are left to finish on their own.
    if shutdown_tx.send(true).is_err() {
        warn!("background tasks already stopped");
    }
    let (scheduler_result, sweeper_result) = tokio::join!(scheduler_task, sweeper_task);
    for result in [scheduler_result, sweeper_result] {
        if let Err(e) = result {
            warn!(error = %e, "background task ended abnormally");
        }
    }

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            warn!(error = %e, "failed to flush spans");
        }
    }

    info!("Cascade API server stopped");
    Ok(())
}
