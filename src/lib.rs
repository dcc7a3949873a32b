//! On-demand MJPEG relay
//!
//! Relays live MJPEG from a small set of named cameras to any number of
//! HTTP clients. Each camera's upstream connection is opened on first demand,
//! shared by every client watching it, and closed again once nobody has been
//! watching for a while.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mjpeg_relay::registry::{SessionConfig, SessionRegistry, SourceConfig};
//! use mjpeg_relay::server::{RelayServer, ServerConfig};
//! use mjpeg_relay::upstream::HttpMjpegConnector;
//!
//! #[tokio::main]
//! async fn main() -> mjpeg_relay::Result<()> {
//!     let config = SessionConfig::default();
//!     let connector = HttpMjpegConnector::new(Duration::from_secs(5), config.max_frame_size)?;
//!
//!     let registry = SessionRegistry::new(
//!         [SourceConfig::new("hallcam", "http://192.168.1.154:8085/video")],
//!         Arc::new(connector),
//!         config,
//!     )?;
//!
//!     let server = RelayServer::new(ServerConfig::default(), Arc::new(registry));
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod upstream;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use registry::{SessionConfig, SessionRegistry, SourceConfig, SourceId};
pub use server::{RelayServer, ServerConfig};
pub use session::{ClientSubscription, SessionState, StreamSession, SubscriptionKind};
