//! Session state machine
//!
//! Tracks the upstream lifecycle of a relay session:
//!
//! ```text
//!            subscribe()                opened
//!   Idle ──────────────────► Connecting ───────► Streaming
//!    ▲                         │   ▲                 │
//!    │              retries    │   │ reconnect       │ idle countdown /
//!    │              exhausted  ▼   │                 ▼ read failure
//!    │                       Failed  ◄──────── Disconnecting
//!    └──────────────────────────────────────────────┘
//!                       cleanup complete
//! ```
//!
//! There is no terminal state; sessions cycle as demand comes and goes.

use serde::Serialize;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No capture loop, no upstream handle
    Idle,
    /// Capture loop running, opening the upstream
    Connecting,
    /// Upstream open, frames flowing into the buffer
    Streaming,
    /// Closing the upstream handle
    Disconnecting,
    /// Upstream could not be opened or kept open
    Failed,
}

impl SessionState {
    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (a, b) if a == b => true,
            (_, Failed) => true,
            (Idle | Failed, Connecting) => true,
            (Connecting, Streaming | Disconnecting | Idle) => true,
            (Streaming, Disconnecting) => true,
            (Disconnecting, Idle | Connecting) => true,
            (Failed, Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
