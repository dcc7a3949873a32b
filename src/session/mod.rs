//! Relay sessions
//!
//! One [`StreamSession`] per configured source. It owns the upstream handle,
//! the capture loop and the latest-frame [`FrameBuffer`]. Consumers hold a
//! [`ClientSubscription`] for as long as they want frames.

pub mod buffer;
pub mod state;
pub mod stream;
pub mod subscription;

pub use buffer::{FrameBuffer, FrameSlot};
pub use state::SessionState;
pub use stream::{SessionStatus, StreamSession};
pub use subscription::{ClientSubscription, SubscriptionKind};
