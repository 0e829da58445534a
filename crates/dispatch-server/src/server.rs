use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dispatch_engine::ChatPipeline;
use dispatch_settings::DispatchSettings;

use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    /// How often idle rate-limit sessions are swept.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            sweep_interval: settings.rate_limit.sweep_interval(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ChatPipeline,
    /// Parent of every request's cancellation token.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: ChatPipeline) -> Self {
        Self {
            pipeline,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/api/usage", get(handlers::usage))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, spawn the server and the rate-limit sweeper. Returns once the
/// listener is bound.
pub async fn start(config: ServerConfig, pipeline: ChatPipeline) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(pipeline);
    let shutdown = state.shutdown.clone();

    let sweeper = state
        .pipeline
        .rate_limiter()
        .clone()
        .spawn_sweeper(config.sweep_interval, shutdown.child_token());

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "dispatch server started");

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(error) = result {
            tracing::error!(%error, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
        sweeper,
    })
}

/// Handle returned by [`start`]. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    /// Cancel in-flight requests, stop accepting connections and wait for
    /// the background tasks to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        let _ = self.sweeper.await;
        tracing::info!("dispatch server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dispatch_store::MemoryUsageLedger;

    fn pipeline() -> ChatPipeline {
        ChatPipeline::new(&DispatchSettings::default(), None, Arc::new(MemoryUsageLedger::new()))
    }

    #[test]
    fn config_follows_settings() {
        let mut settings = DispatchSettings::default();
        settings.server.port = 9000;
        settings.rate_limit.sweep_interval_secs = 30;
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(config.port, 9000);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn build_router_creates_routes() {
        let _router = build_router(AppState::new(pipeline()));
    }

    #[tokio::test]
    async fn server_starts_and_shuts_down() {
        let handle = start(ServerConfig::default(), pipeline()).await.unwrap();
        assert!(handle.port > 0);
        handle.shutdown().await;
    }
}
