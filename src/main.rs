//! AR Portal binary entry point

use arportal::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start HTTP server
/// 6. Spawn the marker worker pool and scheduler
/// 7. On shutdown signal, stop accepting new jobs and wait out the grace
///    period for in-flight work (Lifecycle Orchestrator, C7)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_format = std::env::var("ARPORTAL__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "arportal=info,tower_http=debug".into()))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "arportal=info,tower_http=debug".into()))
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting AR Portal...");
    arportal::metrics::init_metrics();

    let config = match config::AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };
    tracing::info!(public_base_url = %config.server.public_base_url, "Configuration loaded");

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    };

    let app = build_router(state.clone());

    let addr = config.server.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_background_workers(&state, shutdown_rx.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    tracing::info!("HTTP listener stopped, signalling background workers to drain");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_secs(config.pipeline.shutdown_grace_seconds)).await;
    tracing::info!("Shutdown grace period elapsed, exiting");

    Ok(())
}

/// Spawns the marker worker pool, the credential refresher, and the
/// scheduler as supervised background tasks (C2, C4, C5).
fn spawn_background_workers(state: &AppState, shutdown: tokio::sync::watch::Receiver<bool>) {
    use arportal::credentials::Refresher;
    use arportal::pipeline::WorkerPool;
    use arportal::scheduler::Scheduler;
    use std::sync::Arc;

    let worker_pool = Arc::new(WorkerPool::new(
        state.db.clone(),
        state.content.clone(),
        state.credentials.clone(),
        Arc::new(state.config.storage.clone()),
        state.config.server.public_base_url.clone(),
        state.config.pipeline.clone(),
    ));
    worker_pool.spawn(shutdown.clone());

    let scheduler = Arc::new(Scheduler::new(state.db.clone(), state.content.clone(), state.config.scheduler.clone()));
    scheduler.spawn(shutdown.clone());

    let refresher = Refresher::new(
        state.db.clone(),
        state.credentials.clone(),
        Arc::new(arportal::api::oauth::CloudDiskRefresher::new(state.config.clone())),
        &state.config.credentials,
    );
    tokio::spawn(refresher.run(shutdown));

    tracing::info!("Background workers spawned: marker pipeline, scheduler, credential refresher");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Build the Axum router with all routes.
fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(arportal::auth::auth_router())
        .nest("/", arportal::api::public_router())
        .nest("/admin", arportal::api::admin_router())
        .nest("/oauth", arportal::api::oauth_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(arportal::api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.public_base_url.starts_with("https") {
        return CorsLayer::permissive();
    }

    match HeaderValue::from_str(server.base_url()) {
        Ok(origin) => CorsLayer::new().allow_origin([origin]).allow_methods(Any).allow_headers(Any),
        Err(error) => {
            tracing::error!(%error, origin = %server.base_url(), "failed to parse CORS origin from public base URL; denying cross-origin requests");
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
