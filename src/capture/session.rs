//! Ownership of the camera and encoder for the life of the process
//!
//! Every operation takes the session lock for its whole duration, so a
//! restart is never interleaved with another restart or a control write.
//! All methods block except `is_running`, which reads a flag kept outside
//! the lock; async callers go through `spawn_blocking` for the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

use super::backend::{Camera, CaptureError, EncoderFactory, LiveBounds};
use super::buffer::FrameBuffer;
use crate::controls::ControlValue;
use crate::error::{Error, Result};
use crate::CaptureConfig;

struct SessionState {
    camera: Box<dyn Camera>,
    config: CaptureConfig,
}

/// Outcome of forwarding a control set to the camera
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub rejected: Vec<String>,
    pub unsupported: Vec<String>,
}

pub struct CaptureSession {
    state: Mutex<SessionState>,
    running: AtomicBool,
    buffer: FrameBuffer,
    encoders: Box<dyn EncoderFactory>,
}

impl CaptureSession {
    pub fn new(
        camera: Box<dyn Camera>,
        encoders: Box<dyn EncoderFactory>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState { camera, config }),
            running: AtomicBool::new(false),
            buffer: FrameBuffer::new(),
            encoders,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer every produced frame is published into.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn config(&self) -> CaptureConfig {
        self.lock().config.clone()
    }

    /// Never waits on an in-flight start, stop or restart.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Configure the camera and begin continuous capture with `config`.
    #[instrument(skip(self, config), fields(quality = config.quality))]
    pub fn start(&self, config: CaptureConfig) -> Result<()> {
        let mut state = self.lock();
        self.stop_locked(&mut state);
        self.start_locked(&mut state, config)
    }

    /// Halt capture and release the encoder. No-op when not running.
    pub fn stop(&self) {
        let mut state = self.lock();
        self.stop_locked(&mut state);
    }

    /// Stop, then start again with a new encoder quality, as one operation.
    ///
    /// Relays waiting on the buffer see a gap until the new encoder's first
    /// frame is published.
    #[instrument(skip(self))]
    pub fn restart_with_quality(&self, quality: u8) -> Result<()> {
        let mut state = self.lock();
        let config = state.config.with_quality(quality);

        self.stop_locked(&mut state);
        metrics::counter!("capture_restarts").increment(1);
        self.start_locked(&mut state, config)
    }

    /// Start with the last known configuration unless already running.
    /// Returns true if this call started capture.
    pub fn ensure_running(&self) -> Result<bool> {
        let mut state = self.lock();
        if self.is_running() {
            return Ok(false);
        }
        let config = state.config.clone();
        self.start_locked(&mut state, config)?;
        Ok(true)
    }

    /// Write each control to the camera. A refused value is logged and
    /// skipped; the rest of the batch is still applied.
    pub fn apply_controls(&self, values: &[(String, ControlValue)]) -> ApplyReport {
        let mut state = self.lock();
        let mut report = ApplyReport::default();

        for (id, value) in values {
            match state.camera.set_control(id, value) {
                Ok(()) => report.applied.push(id.clone()),
                Err(CaptureError::Unsupported(_)) => {
                    debug!(control = %id, "Control not supported by camera");
                    report.unsupported.push(id.clone());
                }
                Err(e) => {
                    warn!(control = %id, value = ?value, "Control rejected: {}", e);
                    metrics::counter!("controls_rejected").increment(1);
                    report.rejected.push(id.clone());
                }
            }
        }

        report
    }

    /// Hardware min/max/default for each id the camera knows about.
    /// Empty until capture has been started.
    pub fn read_live_bounds<'a, I>(&self, ids: I) -> HashMap<String, LiveBounds>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.lock();
        if !self.is_running() {
            return HashMap::new();
        }

        ids.into_iter()
            .filter_map(|id| state.camera.live_bounds(id).map(|b| (id.to_string(), b)))
            .collect()
    }

    fn start_locked(&self, state: &mut SessionState, config: CaptureConfig) -> Result<()> {
        state
            .camera
            .configure(&config)
            .map_err(Error::CaptureUnavailable)?;

        let encoder = self
            .encoders
            .construct(config.quality)
            .map_err(Error::CaptureUnavailable)?;

        state
            .camera
            .start(encoder, self.buffer.clone())
            .map_err(Error::CaptureUnavailable)?;

        info!(
            "Capture started: {}x{} {:?} @ {}fps, quality {}",
            config.width, config.height, config.format, config.fps, config.quality
        );
        state.config = config;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_locked(&self, state: &mut SessionState) {
        if !self.is_running() {
            return;
        }
        if let Err(e) = state.camera.stop() {
            warn!("Camera stop failed: {}", e);
        }
        self.running.store(false, Ordering::Release);
        info!("Capture stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
