//! Session registry
//!
//! The registry owns the static source table and one lazily created
//! [`StreamSession`](crate::session::StreamSession) per source. Consumers go
//! through it to find the session for a request.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                   ┌───────────────────────────┐
//!                   │ sources: SourceId → URL   │
//!                   │ sessions: SourceId →      │
//!                   │   Arc<StreamSession> {    │
//!                   │     buffer: watch::Tx,    │
//!                   │     demand, capture loop  │
//!                   │   }                       │
//!                   └─────────────┬─────────────┘
//!                                 │ acquire(id)
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!   [GET /camera]           [GET /camera]          [GET /snapshot]
//!   next_frame()            next_frame()           snapshot()
//! ```
//!
//! Frames are `bytes::Bytes`, so every consumer shares the one encoded
//! allocation published by the capture loop.

pub mod config;
pub mod source;
pub mod store;

pub use config::SessionConfig;
pub use source::{SourceConfig, SourceId};
pub use store::SessionRegistry;
