//! V4L2 camera backend
//!
//! Control identifiers follow libcamera naming; the subset a UVC-style device
//! can express is translated onto V4L2 control ids here.

use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Description, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::backend::{Camera, CaptureError, Encoder, LiveBounds};
use super::buffer::FrameBuffer;
use super::frame::{Frame, FrameMetadata, PixelFormat, RawImage};
use crate::controls::ControlValue;
use crate::{utils, CaptureConfig};

const CID_BASE: u32 = 0x0098_0900;
const CID_BRIGHTNESS: u32 = CID_BASE;
const CID_CONTRAST: u32 = CID_BASE + 1;
const CID_SATURATION: u32 = CID_BASE + 2;
const CID_AUTO_WHITE_BALANCE: u32 = CID_BASE + 12;
const CID_GAIN: u32 = CID_BASE + 19;
const CID_SHARPNESS: u32 = CID_BASE + 27;
const CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;
const CID_EXPOSURE_AUTO: u32 = CID_CAMERA_CLASS_BASE + 1;
const CID_EXPOSURE_ABSOLUTE: u32 = CID_CAMERA_CLASS_BASE + 2;

// V4L2_EXPOSURE_MANUAL / V4L2_EXPOSURE_APERTURE_PRIORITY
/// Dequeue wait; bounds how long a stop request can go unnoticed
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);
/// Capture thread gives up after this many failed dequeues in a row
const MAX_CONSECUTIVE_ERRORS: u32 = 50;
const MAX_BACKOFF: Duration = Duration::from_secs(1);

const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// How a control value maps onto the device's integer range
#[derive(Debug, Clone, Copy)]
enum Scale {
    /// Same units on both sides
    Identity,
    /// Control units per device unit (ExposureTime is µs, V4L2 uses 100 µs)
    Factor(f64),
    /// Linear map of `[lo, hi]` onto the device's `[min, max]`
    Normalized { lo: f64, hi: f64 },
    /// Multiplier of the device default (1.0 = device default)
    Relative,
    Toggle { on: i64, off: i64 },
}

fn mapping(id: &str) -> Option<(u32, Scale)> {
    let mapped = match id {
        "AeEnable" => (
            CID_EXPOSURE_AUTO,
            Scale::Toggle {
                on: EXPOSURE_APERTURE_PRIORITY,
                off: EXPOSURE_MANUAL,
            },
        ),
        "ExposureTime" => (CID_EXPOSURE_ABSOLUTE, Scale::Factor(100.0)),
        "AnalogueGain" => (CID_GAIN, Scale::Identity),
        "AwbEnable" => (CID_AUTO_WHITE_BALANCE, Scale::Toggle { on: 1, off: 0 }),
        "Brightness" => (CID_BRIGHTNESS, Scale::Normalized { lo: -1.0, hi: 1.0 }),
        "Sharpness" => (CID_SHARPNESS, Scale::Normalized { lo: 0.0, hi: 16.0 }),
        "Contrast" => (CID_CONTRAST, Scale::Relative),
        "Saturation" => (CID_SATURATION, Scale::Relative),
        _ => return None,
    };
    Some(mapped)
}

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
}

struct Worker {
    stop_tx: flume::Sender<()>,
    handle: JoinHandle<()>,
}

/// Camera backed by a V4L2 capture device
pub struct V4l2Camera {
    device: Option<Box<Device>>,
    config: Option<CaptureConfig>,
    controls: HashMap<u32, Description>,
    worker: Option<Worker>,
}

impl V4l2Camera {
    pub fn new() -> Self {
        Self {
            device: None,
            config: None,
            controls: HashMap::new(),
            worker: None,
        }
    }

    fn device(&self) -> Result<&Device, CaptureError> {
        self.device
            .as_deref()
            .ok_or_else(|| CaptureError::Unavailable("device not configured".into()))
    }

    fn device_value(&self, id: &str, value: &ControlValue) -> Result<(u32, i64), CaptureError> {
        let (cid, scale) = mapping(id).ok_or_else(|| CaptureError::Unsupported(id.into()))?;
        let desc = self
            .controls
            .get(&cid)
            .ok_or_else(|| CaptureError::Unsupported(id.into()))?;
        let v = value.as_f64().ok_or_else(|| CaptureError::ControlRejected {
            id: id.into(),
            reason: format!("{:?} has no scalar form", value),
        })?;

        let raw = match scale {
            Scale::Identity => v.round() as i64,
            Scale::Factor(f) => (v / f).round() as i64,
            Scale::Normalized { lo, hi } => {
                let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
                desc.minimum + (t * (desc.maximum - desc.minimum) as f64).round() as i64
            }
            Scale::Relative => (desc.default as f64 * v).round() as i64,
            Scale::Toggle { on, off } => {
                if v != 0.0 {
                    on
                } else {
                    off
                }
            }
        };

        Ok((cid, raw.clamp(desc.minimum, desc.maximum)))
    }
}

impl Default for V4l2Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera for V4l2Camera {
    #[instrument(skip(self, config), fields(device = %config.device))]
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            self.stop()?;
        }

        let mut config = config.clone();
        if config.device.is_empty() {
            let found = utils::auto_detect_device()?;
            config.device = found.path;
            config.format = found.format;
        }

        let device = Device::with_path(&config.device).map_err(|e| {
            CaptureError::Unavailable(format!("cannot open {}: {}", config.device, e))
        })?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unavailable(
                "Device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);
        let applied = device.set_format(&fmt)?;

        if applied.fourcc != fmt.fourcc {
            return Err(CaptureError::Unavailable(format!(
                "device refused pixel format {:?}",
                config.format
            )));
        }
        if applied.width != config.width || applied.height != config.height {
            warn!(
                "Requested {}x{}, device chose {}x{}",
                config.width, config.height, applied.width, applied.height
            );
            config.width = applied.width;
            config.height = applied.height;
        }

        if config.fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
                warn!("Cannot set frame rate {}: {}", config.fps, e);
            }
        }

        self.controls = match device.query_controls() {
            Ok(descriptions) => descriptions.into_iter().map(|d| (d.id, d)).collect(),
            Err(e) => {
                warn!("Cannot enumerate controls: {}", e);
                HashMap::new()
            }
        };
        debug!("{} device controls", self.controls.len());

        self.device = Some(Box::new(device));
        self.config = Some(config);
        Ok(())
    }

    fn start(
        &mut self,
        encoder: Box<dyn Encoder>,
        output: FrameBuffer,
    ) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            self.stop()?;
        }

        let config = self
            .config
            .clone()
            .ok_or_else(|| CaptureError::Unavailable("device not configured".into()))?;

        let mut stream =
            MmapStream::with_buffers(self.device()?, Type::VideoCapture, config.buffer_count)
                .map_err(|e| CaptureError::Unavailable(format!("cannot map buffers: {}", e)))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        let (stop_tx, stop_rx) = flume::bounded(1);
        let handle = std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || run(stream, encoder, output, stop_rx, config))?;

        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("V4L2 capture thread panicked");
            }
            info!("Capture stream stopped");
        }
        Ok(())
    }

    fn set_control(&mut self, id: &str, value: &ControlValue) -> Result<(), CaptureError> {
        let (cid, raw) = self.device_value(id, value)?;
        self.device()?
            .set_control(Control {
                id: cid,
                value: Value::Integer(raw),
            })
            .map_err(|e| CaptureError::ControlRejected {
                id: id.into(),
                reason: e.to_string(),
            })
    }

    fn live_bounds(&self, id: &str) -> Option<LiveBounds> {
        let (cid, scale) = mapping(id)?;
        let desc = self.controls.get(&cid)?;
        let factor = match scale {
            Scale::Identity => 1.0,
            Scale::Factor(f) => f,
            _ => return None,
        };

        Some(LiveBounds {
            min: desc.minimum as f64 * factor,
            max: desc.maximum as f64 * factor,
            default: desc.default as f64 * factor,
        })
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run(
    mut stream: MmapStream<'static>,
    mut encoder: Box<dyn Encoder>,
    output: FrameBuffer,
    stop_rx: flume::Receiver<()>,
    config: CaptureConfig,
) {
    info!(
        "Capture stream started with {} buffers, quality {}",
        config.buffer_count,
        encoder.quality()
    );

    let mut sequence = 0u64;
    let mut failures = 0u32;

    while let Err(flume::TryRecvError::Empty) = stop_rx.try_recv() {
        let (buf, meta) = match stream.next() {
            Ok(next) => {
                if failures > 0 {
                    info!("Capture recovered after {} failed dequeues", failures);
                    failures = 0;
                }
                next
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                debug!("No frame within {:?}", DEQUEUE_TIMEOUT);
                continue;
            }
            Err(e) => {
                failures += 1;
                metrics::counter!("capture_errors").increment(1);
                if failures >= MAX_CONSECUTIVE_ERRORS {
                    error!("Capture thread giving up after {} errors: {}", failures, e);
                    break;
                }
                // First failure and then every tenth
                if failures % 10 == 1 {
                    warn!(failures, "Capture error: {}", e);
                }
                // Backoff doubles as the stop check
                if stop_rx.recv_timeout(backoff(failures)).is_ok() {
                    break;
                }
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let image = RawImage {
            data: &buf[..used],
            width: config.width,
            height: config.height,
            format: config.format,
        };

        let data = match encoder.encode(&image) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                continue;
            }
        };

        sequence += 1;
        output.publish(Frame::new(
            data,
            FrameMetadata {
                sequence,
                width: config.width,
                height: config.height,
                quality: encoder.quality(),
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            },
        ));
    }

    debug!("Capture thread exiting after {} frames", sequence);
}

/// Pause after `failures` consecutive dequeue errors: 10 ms, doubling, capped.
fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    (Duration::from_millis(10) * 2u32.pow(exp)).min(MAX_BACKOFF)
}
