//! Per-client MJPEG relay
//!
//! Each connected client owns one [`StreamRelay`]. It paces itself, waits for
//! the next published frame and emits it as one multipart part. A client
//! going away drops its body stream and with it the relay; nothing else
//! notices.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use tracing::debug;

use super::AppState;
use crate::capture::FrameReader;
use crate::error::Result;

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

static NEXT_RELAY: AtomicU64 = AtomicU64::new(1);

/// `GET /`: attach a relay, starting capture first if it is not running.
pub async fn stream(State(state): State<Arc<AppState>>) -> Result<Response> {
    state.registry.ensure_capture().await?;

    let relay = StreamRelay::new(state.buffer.subscribe(), state.frame_delay);
    let body = Body::from_stream(relay.into_stream());

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

/// Wrap one JPEG image as a multipart part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    const HEAD: &[u8] = b"\r\nContent-Type: image/jpeg\r\n\r\n";

    let mut chunk = BytesMut::with_capacity(2 + BOUNDARY.len() + HEAD.len() + jpeg.len() + 2);
    chunk.put_slice(b"--");
    chunk.put_slice(BOUNDARY.as_bytes());
    chunk.put_slice(HEAD);
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

pub struct StreamRelay {
    reader: FrameReader,
    delay: Duration,
    _attached: Attached,
}

impl StreamRelay {
    pub fn new(reader: FrameReader, delay: Duration) -> Self {
        Self {
            reader,
            delay,
            _attached: Attached::new(),
        }
    }

    /// Sleep the pacing delay, then wait for a fresh frame.
    /// `None` once the frame source is gone.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let frame = self.reader.await_next().await?;
        metrics::counter!("relay_frames_sent").increment(1);
        Some(multipart_chunk(&frame.data))
    }

    pub fn into_stream(self) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send {
        stream::unfold(self, |mut relay| async move {
            let chunk = relay.next_chunk().await?;
            Some((Ok(chunk), relay))
        })
    }
}

/// Attachment record; dropping it marks the client as gone.
struct Attached {
    id: u64,
}

impl Attached {
    fn new() -> Self {
        let id = NEXT_RELAY.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("relays_active").increment(1.0);
        debug!(relay = id, "Client attached");
        Self { id }
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        metrics::gauge!("relays_active").decrement(1.0);
        debug!(relay = self.id, "Client detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, FrameBuffer, FrameMetadata};
    use futures::StreamExt;

    fn frame(seq: u64, data: &'static [u8]) -> Frame {
        Frame::new(
            Bytes::from_static(data),
            FrameMetadata {
                sequence: seq,
                width: 1,
                height: 1,
                quality: 75,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn chunk_layout() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            &chunk[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }

    #[tokio::test]
    async fn relay_emits_published_frames_and_ends_with_buffer() {
        let buffer = FrameBuffer::new();
        let mut relay = StreamRelay::new(buffer.subscribe(), Duration::ZERO);

        let publisher = buffer.clone();
        let (chunk, ()) = tokio::join!(relay.next_chunk(), async move {
            tokio::task::yield_now().await;
            publisher.publish(frame(1, b"one"));
        });
        assert!(chunk.unwrap().ends_with(b"one\r\n"));

        let mut stream = Box::pin(relay.into_stream());
        drop(buffer);
        assert!(stream.next().await.is_none());
    }
}
