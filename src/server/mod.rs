//! HTTP front end
//!
//! One listener serves every configured camera, routed by path.

pub mod config;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::AppState;
pub use listener::RelayServer;
