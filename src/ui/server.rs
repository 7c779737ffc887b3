//! HTTP/WebSocket server
//!
//! One listener serves the static browser player, the status API, and
//! the `/ws` stream endpoint.

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::ui::{handlers, websocket};

/// Shared state for all handlers
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub started: Instant,
}

pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: ServerConfig, hub: Arc<BroadcastHub>) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                hub,
                started: Instant::now(),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(websocket::ws_handler))
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .fallback_service(ServeDir::new(&self.config.static_dir))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the process exits.
    ///
    /// A bind failure is fatal: there is no server without a listener.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("listening on http://{}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Run the server on a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.serve())
    }
}
