//! Single-slot broadcast hand-off between the capture thread and relays
//!
//! The buffer remembers at most one frame. Every publish bumps the slot's
//! version and wakes all readers; a reader only ever receives frames that
//! were published after it started waiting, so nothing is replayed.

use std::sync::Arc;

use tokio::sync::watch;

use super::frame::Frame;

/// Latest-frame cell shared by the capture session and every relay
#[derive(Clone)]
pub struct FrameBuffer {
    slot: Arc<watch::Sender<Option<Frame>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Replace the stored frame and release every waiter.
    ///
    /// Callable from a plain thread; never blocks on readers.
    pub fn publish(&self, frame: Frame) {
        self.slot.send_replace(Some(frame));
        metrics::counter!("frames_published").increment(1);
    }

    /// New reader. Frames already published are considered observed.
    pub fn subscribe(&self) -> FrameReader {
        FrameReader {
            slot: self.slot.subscribe(),
        }
    }

    /// Most recent frame, if any was ever published.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.borrow().clone()
    }

    /// Number of readers currently attached.
    pub fn reader_count(&self) -> usize {
        self.slot.receiver_count()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's view of the buffer
pub struct FrameReader {
    slot: watch::Receiver<Option<Frame>>,
}

impl FrameReader {
    /// Wait for the next frame published after this call began.
    ///
    /// Returns `None` only once the buffer itself has been dropped.
    pub async fn await_next(&mut self) -> Option<Frame> {
        // Whatever is stored now is stale for this caller.
        self.slot.borrow_and_update();

        loop {
            self.slot.changed().await.ok()?;
            if let Some(frame) = self.slot.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}
