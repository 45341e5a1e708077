//! REST API and WebSocket server for the monitoring engine
//!
//! A thin layer over [`MonitorEngine`](crate::engine::MonitorEngine): every mutation goes
//! through the engine's stop-before-mutate operations, reads go to the store.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/devices` - Live state of every device
//! - `POST /api/devices` - Create a device with its services
//! - `PUT /api/devices/:id` - Replace a device definition
//! - `DELETE /api/devices/:id` - Delete a device with its services and logs
//! - `GET /api/devices/:id/history` - Downtime intervals, newest first
//! - `GET /api/devices/:id/latency` - Latency samples, oldest first
//! - `GET /api/services/:id/history` - Same, for a service
//! - `GET /api/services/:id/latency` - Same, for a service
//! - `GET /api/settings` / `POST /api/settings` - Alert channel settings
//! - `WS /api/stream` - Live event feed

pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, put};
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:3000")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl ApiConfig {
    /// Resolve the bind address from the config file and the environment
    pub fn from_settings(settings: &crate::config::ApiSettings) -> Self {
        Self {
            bind_addr: crate::util::bind_address(settings.bind.as_deref()),
            enable_cors: settings.enable_cors,
        }
    }
}

/// All routes, without CORS
pub fn router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route(
            "/api/devices",
            get(routes::devices::list_devices).post(routes::devices::create_device),
        )
        .route(
            "/api/devices/:id",
            put(routes::devices::update_device).delete(routes::devices::delete_device),
        )
        .route(
            "/api/devices/:id/history",
            get(routes::history::device_history),
        )
        .route(
            "/api/devices/:id/latency",
            get(routes::history::device_latency),
        )
        .route(
            "/api/services/:id/history",
            get(routes::history::service_history),
        )
        .route(
            "/api/services/:id/latency",
            get(routes::history::service_latency),
        )
        .route(
            "/api/settings",
            get(routes::settings::get_settings).post(routes::settings::save_settings),
        )
        .route("/api/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};

    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
