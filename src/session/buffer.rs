//! Latest-frame buffer
//!
//! A single versioned slot holding the most recent JPEG, backed by a
//! `tokio::sync::watch` channel. Each subscriber holds its own receiver, so
//! publishing a frame wakes every waiter without them scanning shared state.
//!
//! The version starts at 0 (no frame yet) and increases by exactly one per
//! published frame. Clearing the slot keeps the version, so no subscriber
//! ever sees it go backwards.

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Contents of the buffer at one point in time
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    /// Version of the most recently published frame
    pub version: u64,
    /// Most recent JPEG, absent before the first frame or after a reset
    pub frame: Option<Bytes>,
}

/// Single-slot versioned frame holder
#[derive(Debug)]
pub struct FrameBuffer {
    tx: watch::Sender<FrameSlot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FrameSlot::default());
        Self { tx }
    }

    /// Replace the frame and wake all waiters, unless `shutdown` is cancelled
    ///
    /// Returns the new version, or None if nothing was published. The check
    /// happens under the channel lock, so a `reset()` made after cancelling
    /// `shutdown` is never overwritten by the loop holding it.
    pub fn publish(
        &self,
        frame: Bytes,
        shutdown: &CancellationToken,
    ) -> Option<u64> {
        let mut version = None;
        self.tx.send_if_modified(|slot| {
            if shutdown.is_cancelled() {
                return false;
            }
            slot.version += 1;
            slot.frame = Some(frame);
            version = Some(slot.version);
            true
        });
        version
    }

    /// Drop the buffered frame, keeping the version
    pub fn reset(&self) {
        self.tx.send_if_modified(|slot| slot.frame.take().is_some());
    }

    /// Consistent copy of the current slot
    pub fn current(&self) -> FrameSlot {
        self.tx.borrow().clone()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Whether a frame is buffered
    pub fn has_frame(&self) -> bool {
        self.tx.borrow().frame.is_some()
    }

    /// Register a new waiter
    pub fn watch(&self) -> watch::Receiver<FrameSlot> {
        self.tx.subscribe()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
