//! Shared harness: a registry over the synthetic camera, no hardware needed

#![allow(dead_code)]

use std::sync::Arc;

use shutterbug::capture::{
    CaptureSession, JpegEncoderFactory, TestPatternCamera, TestPatternProbe,
};
use shutterbug::server::AppState;
use shutterbug::{CaptureBackend, Config, ControlRegistry};

pub struct Harness {
    pub config: Config,
    pub session: Arc<CaptureSession>,
    pub registry: Arc<ControlRegistry>,
    pub probe: Arc<TestPatternProbe>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.capture.backend = CaptureBackend::TestPattern;
    config.capture.width = 32;
    config.capture.height = 24;
    config.capture.fps = 100;
    config.capture.quality = 75;
    config.stream.frame_delay = 0.0;
    config.modes.settle_delay_ms = 0;
    config
}

/// Registry and session, not yet started.
pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: Config) -> Harness {
    let camera = TestPatternCamera::new();
    let probe = camera.probe();
    let session = Arc::new(CaptureSession::new(
        Box::new(camera),
        Box::new(JpegEncoderFactory),
        config.capture.clone(),
    ));
    let registry = Arc::new(ControlRegistry::new(Arc::clone(&session)));

    Harness {
        config,
        session,
        registry,
        probe,
    }
}

impl Harness {
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(Arc::clone(&self.registry), &self.config))
    }
}
