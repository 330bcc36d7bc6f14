//! Capability seams between the capture session and concrete hardware

use bytes::Bytes;

use super::buffer::FrameBuffer;
use super::frame::RawImage;
use crate::controls::ControlValue;
use crate::CaptureConfig;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Device missing, busy, or refusing the requested configuration
    #[error("{0}")]
    Unavailable(String),

    /// Device refused one control value
    #[error("control {id} rejected: {reason}")]
    ControlRejected { id: String, reason: String },

    /// Backend has no way to express this control
    #[error("control {0} not supported by this camera")]
    Unsupported(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Authoritative limits the hardware reports for one control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveBounds {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

/// Turns camera output into the bytes clients receive.
///
/// Encoder parameters are fixed at construction; a different quality means
/// a new encoder.
pub trait Encoder: Send {
    fn quality(&self) -> u8;

    fn encode(&mut self, image: &RawImage<'_>) -> Result<Bytes, CaptureError>;
}

pub trait EncoderFactory: Send + Sync {
    fn construct(&self, quality: u8) -> Result<Box<dyn Encoder>, CaptureError>;
}

/// A camera that can be configured, started, stopped and tuned while running.
///
/// `start` must spawn its own capture thread that encodes every frame and
/// publishes it into `output`; `stop` must join that thread before returning.
pub trait Camera: Send {
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    fn start(
        &mut self,
        encoder: Box<dyn Encoder>,
        output: FrameBuffer,
    ) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    fn set_control(&mut self, id: &str, value: &ControlValue) -> Result<(), CaptureError>;

    fn live_bounds(&self, id: &str) -> Option<LiveBounds>;
}
