//! Server configuration

use std::net::SocketAddr;

use crate::media::DEFAULT_BOUNDARY;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 4999;

/// Server configuration options
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Multipart boundary for `/camera` responses
    pub boundary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the multipart boundary; empty keeps the current one
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        if !boundary.is_empty() {
            self.boundary = boundary;
        }
        self
    }
}
