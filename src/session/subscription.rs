//! Per-consumer subscription handle
//!
//! A subscription holds one unit of demand on its session for as long as it
//! lives. Dropping it gives that demand back.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::SubscriptionError;

use super::buffer::FrameSlot;
use super::stream::StreamSession;

/// What a subscription is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Continuous multipart stream
    Stream,
    /// Single frame fetch
    Snapshot,
}

/// Counted reference to a session, owned by one consumer
pub struct ClientSubscription {
    session: Arc<StreamSession>,
    rx: watch::Receiver<FrameSlot>,
    last_seen_version: u64,
    kind: SubscriptionKind,
}

impl ClientSubscription {
    /// Wrap demand already counted by the session
    pub(crate) fn new(session: Arc<StreamSession>, kind: SubscriptionKind) -> Self {
        let rx = session.buffer().watch();
        Self {
            session,
            rx,
            last_seen_version: 0,
            kind,
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Version of the last frame handed out, 0 if none
    pub fn last_seen_version(&self) -> u64 {
        self.last_seen_version
    }

    /// Wait for a frame newer than the last one returned
    ///
    /// Only the latest frame is delivered; frames published while the caller
    /// was busy are skipped. While the upstream is down the wait is bounded
    /// by the session's stream wait budget.
    pub async fn next_frame(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Bytes, SubscriptionError> {
        let attempts = self.session.config().stream_wait_attempts;
        let interval = self.session.config().stream_wait_interval;
        let mut waited = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SubscriptionError::Cancelled);
            }

            {
                let slot = self.rx.borrow_and_update();
                if slot.version > self.last_seen_version {
                    if let Some(frame) = &slot.frame {
                        self.last_seen_version = slot.version;
                        return Ok(frame.clone());
                    }
                }
            }

            if !self.session.is_connected() {
                if waited >= attempts {
                    tracing::debug!(
                        source = %self.session.id(),
                        waited = waited,
                        "Gave up waiting for upstream"
                    );
                    return Err(SubscriptionError::UpstreamUnavailable);
                }
                waited += 1;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubscriptionError::Cancelled),
                changed = tokio::time::timeout(interval, self.rx.changed()) => {
                    if let Ok(Err(_)) = changed {
                        return Err(SubscriptionError::UpstreamUnavailable);
                    }
                }
            }
        }
    }

    /// Fetch the current frame
    ///
    /// Only waits while the upstream is still connecting. Fails with
    /// `NoFrameYet` as soon as the upstream is connected without a buffered
    /// frame, or `UpstreamUnavailable` once the snapshot wait budget runs out.
    pub async fn snapshot(&mut self, cancel: &CancellationToken) -> Result<Bytes, SubscriptionError> {
        let attempts = self.session.config().snapshot_wait_attempts;
        let interval = self.session.config().snapshot_wait_interval;
        let mut polls = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SubscriptionError::Cancelled);
            }

            {
                let slot = self.rx.borrow_and_update();
                if let Some(frame) = &slot.frame {
                    self.last_seen_version = slot.version;
                    return Ok(frame.clone());
                }
            }

            if self.session.is_connected() {
                return Err(SubscriptionError::NoFrameYet);
            }
            if polls >= attempts {
                return Err(SubscriptionError::UpstreamUnavailable);
            }
            polls += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubscriptionError::Cancelled),
                _ = tokio::time::timeout(interval, self.rx.changed()) => {}
            }
        }
    }

    /// Give the demand back to the session
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        let remaining = self.session.release_demand();
        tracing::debug!(
            source = %self.session.id(),
            kind = ?self.kind,
            clients = remaining,
            "Client released"
        );
    }
}

impl std::fmt::Debug for ClientSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSubscription")
            .field("source", self.session.id())
            .field("kind", &self.kind)
            .field("last_seen_version", &self.last_seen_version)
            .finish()
    }
}
