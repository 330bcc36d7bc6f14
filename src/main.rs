//! Shutterbug camera streaming server

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shutterbug::capture::{self, CaptureSession, JpegEncoderFactory};
use shutterbug::server::{self, AppState};
use shutterbug::{Config, ControlRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shutterbug=info,tower_http=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Shutterbug launching...");

    // Load configuration: explicit path from argv or SHUTTERBUG_CONFIG
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("SHUTTERBUG_CONFIG"))
        .map(PathBuf::from);
    let config = Config::load(path.as_deref()).wrap_err("Failed to load configuration")?;

    // Capture must come up before any traffic is served
    let camera = capture::open_camera(&config.capture);
    let session = Arc::new(CaptureSession::new(
        camera,
        Box::new(JpegEncoderFactory),
        config.capture.clone(),
    ));
    let registry = Arc::new(ControlRegistry::new(Arc::clone(&session)));
    let report = match registry.initialize().await {
        Ok(report) => report,
        Err(e) => {
            error!("Camera could not be started: {}", e);
            return Err(e).wrap_err("Capture unavailable at startup");
        }
    };
    info!(
        applied = report.applied.len(),
        rejected = report.rejected.len(),
        unsupported = report.unsupported.len(),
        "Initial controls applied"
    );

    let state = Arc::new(AppState::new(registry, &config));
    server::serve(state, &config).await?;

    // Release the camera before exit
    session.stop();
    info!("Shutterbug shutting down");
    Ok(())
}
