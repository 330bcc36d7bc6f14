pub mod backend;
pub mod buffer;
pub mod encoder;
pub mod frame;
pub mod session;
#[cfg(feature = "test-pattern")]
pub mod test_pattern;
pub mod v4l2;

pub use backend::{Camera, CaptureError, Encoder, EncoderFactory, LiveBounds};
pub use buffer::{FrameBuffer, FrameReader};
pub use encoder::{JpegEncoder, JpegEncoderFactory};
pub use frame::{Frame, FrameMetadata, PixelFormat, RawImage};
pub use session::{ApplyReport, CaptureSession};
#[cfg(feature = "test-pattern")]
pub use test_pattern::{TestPatternCamera, TestPatternProbe};
pub use v4l2::V4l2Camera;

use crate::{CaptureBackend, CaptureConfig};

/// Camera capability selected by configuration.
pub fn open_camera(config: &CaptureConfig) -> Box<dyn Camera> {
    match config.backend {
        CaptureBackend::V4l2 => Box::new(V4l2Camera::new()),
        #[cfg(feature = "test-pattern")]
        CaptureBackend::TestPattern => Box::new(TestPatternCamera::new()),
    }
}
