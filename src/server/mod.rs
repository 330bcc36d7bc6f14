//! HTTP surface
//!
//! - `GET /`, `GET /stream`: MJPEG multipart stream
//! - `GET /meta`: every enabled control with its current value
//! - `GET /modes`: the preset table
//! - `POST /mode`: apply a preset
//! - `POST /controls`: apply a partial control mapping
//! - `POST /quality`: change stream quality
//! - `GET /healthz`: capture and client status

pub mod api;
pub mod relay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::capture::FrameBuffer;
use crate::controls::ControlRegistry;
use crate::error::Result;
use crate::modes::ModePreset;
use crate::Config;

/// Shared state for every handler
pub struct AppState {
    pub registry: Arc<ControlRegistry>,
    pub modes: ModePreset,
    pub buffer: FrameBuffer,
    pub frame_delay: Duration,
    pub title: String,
}

impl AppState {
    pub fn new(registry: Arc<ControlRegistry>, config: &Config) -> Self {
        Self {
            modes: ModePreset::new(Arc::clone(&registry), config.modes.settle_delay()),
            buffer: registry.session().buffer().clone(),
            frame_delay: config.stream.frame_delay(),
            title: config.server.title.clone(),
            registry,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(relay::stream))
        .route("/stream", get(relay::stream))
        .route("/meta", get(api::meta))
        .route("/modes", get(api::modes))
        .route("/mode", post(api::set_mode))
        .route("/controls", post(api::set_controls))
        .route("/quality", post(api::set_quality))
        .route("/healthz", get(api::health))
        .layer(middleware::map_response(no_cache))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Frames and control state are live; nothing may be cached.
async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, private"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::AGE, HeaderValue::from_static("0"));
    response
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(state: Arc<AppState>, config: &Config) -> Result<()> {
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let bind: SocketAddr = listener.local_addr()?;
    info!("Streaming on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown requested");
}
