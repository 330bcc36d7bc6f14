//! Synthetic camera for development without hardware and for tests
//!
//! Produces a moving colour pattern at the configured frame rate and keeps a
//! record of everything the session asked of it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::RecvTimeoutError;
use tracing::{debug, info, warn};

use super::backend::{Camera, CaptureError, Encoder, LiveBounds};
use super::buffer::FrameBuffer;
use super::frame::{Frame, FrameMetadata, PixelFormat, RawImage};
use crate::controls::ControlValue;
use crate::CaptureConfig;

/// Observable state of a [`TestPatternCamera`], shared with tests and callers that inspect it
#[derive(Default)]
pub struct TestPatternProbe {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_configure: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    bounds: Mutex<HashMap<String, LiveBounds>>,
    writes: AtomicUsize,
    last_written: Mutex<HashMap<String, ControlValue>>,
}

impl TestPatternProbe {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make the next `configure` calls fail, as a missing sensor would.
    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    /// Refuse every write to `id`.
    pub fn reject_control(&self, id: &str) {
        lock(&self.rejected).insert(id.to_string());
    }

    pub fn set_live_bounds(&self, id: &str, bounds: LiveBounds) {
        lock(&self.bounds).insert(id.to_string(), bounds);
    }

    /// Number of accepted control writes since the last clear.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Last value written to `id`. Only the newest value per control is kept.
    pub fn last_write(&self, id: &str) -> Option<ControlValue> {
        lock(&self.last_written).get(id).cloned()
    }

    pub fn clear_writes(&self) {
        lock(&self.last_written).clear();
        self.writes.store(0, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    stop_tx: flume::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TestPatternCamera {
    probe: Arc<TestPatternProbe>,
    config: Option<CaptureConfig>,
    worker: Option<Worker>,
}

impl TestPatternCamera {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(TestPatternProbe::default()),
            config: None,
            worker: None,
        }
    }

    pub fn probe(&self) -> Arc<TestPatternProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera for TestPatternCamera {
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if self.probe.fail_configure.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable(
                "test pattern told to fail configure".into(),
            ));
        }
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "invalid size {}x{}",
                config.width, config.height
            )));
        }

        self.config = Some(config.clone());
        Ok(())
    }

    fn start(
        &mut self,
        encoder: Box<dyn Encoder>,
        output: FrameBuffer,
    ) -> Result<(), CaptureError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| CaptureError::Unavailable("camera not configured".into()))?;

        if self.worker.is_some() {
            self.stop()?;
        }

        let (stop_tx, stop_rx) = flume::bounded(1);
        let handle = std::thread::Builder::new()
            .name("test-pattern".into())
            .spawn(move || generate(config, encoder, output, stop_rx))?;

        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                warn!("Test pattern thread panicked");
            }
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_control(&mut self, id: &str, value: &ControlValue) -> Result<(), CaptureError> {
        if lock(&self.probe.rejected).contains(id) {
            return Err(CaptureError::ControlRejected {
                id: id.to_string(),
                reason: "rejected by test pattern".into(),
            });
        }
        lock(&self.probe.last_written).insert(id.to_string(), value.clone());
        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn live_bounds(&self, id: &str) -> Option<LiveBounds> {
        lock(&self.probe.bounds).get(id).copied()
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn generate(
    config: CaptureConfig,
    mut encoder: Box<dyn Encoder>,
    output: FrameBuffer,
    stop_rx: flume::Receiver<()>,
) {
    let interval = Duration::from_micros(1_000_000 / config.fps.max(1) as u64);
    let (width, height) = (config.width, config.height);
    let mut rgb = vec![0u8; (width * height * 3) as usize];
    let mut sequence = 0u64;

    info!(
        "Test pattern started: {}x{} @ {}fps, quality {}",
        width,
        height,
        config.fps,
        encoder.quality()
    );

    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        sequence += 1;
        paint(&mut rgb, width, height, sequence);

        let image = RawImage {
            data: &rgb,
            width,
            height,
            format: PixelFormat::Rgb24,
        };

        match encoder.encode(&image) {
            Ok(data) => output.publish(Frame::new(
                data,
                FrameMetadata {
                    sequence,
                    width,
                    height,
                    quality: encoder.quality(),
                    device_timestamp: None,
                },
            )),
            Err(e) => warn!("Test pattern encode failed: {}", e),
        }
    }

    debug!("Test pattern stopped after {} frames", sequence);
}

fn paint(rgb: &mut [u8], width: u32, height: u32, sequence: u64) {
    let shift = (sequence * 4) as u32;
    for y in 0..height {
        for x in 0..width {
            let i = ((y * width + x) * 3) as usize;
            rgb[i] = ((x + shift) % 256) as u8;
            rgb[i + 1] = (y * 255 / height.max(1)) as u8;
            rgb[i + 2] = (sequence * 8 % 256) as u8;
        }
    }
}
