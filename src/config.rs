//! Relay configuration file
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:4999"
//!
//! [session]
//! connect_attempts = 35
//! connect_retry_delay_ms = 200
//! idle_cycles = 45
//!
//! [[sources]]
//! id = "hallcam"
//! url = "http://192.168.1.154:8085/video"
//! ```
//!
//! Every `[server]` and `[session]` key is optional.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::{SessionConfig, SourceConfig};
use crate::server::ServerConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub sources: Vec<SourceConfig>,
}

/// `[server]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: Option<SocketAddr>,
    pub boundary: Option<String>,
}

/// `[session]` table, durations in milliseconds
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub connect_attempts: Option<u32>,
    pub connect_retry_delay_ms: Option<u64>,
    pub idle_cycles: Option<u32>,
    pub read_timeout_ms: Option<u64>,
    pub max_read_errors: Option<u32>,
    pub max_reconnects: Option<u32>,
    pub stream_wait_attempts: Option<u32>,
    pub stream_wait_interval_ms: Option<u64>,
    pub snapshot_wait_attempts: Option<u32>,
    pub snapshot_wait_interval_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
    pub max_frame_size: Option<usize>,
}

impl RelayConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        text.parse()
    }

    /// Check source entries
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.as_str().is_empty() {
                return Err(ConfigError::InvalidSource("empty camera id".into()));
            }
            if source.url.trim().is_empty() {
                return Err(ConfigError::InvalidSource(format!(
                    "camera {} has no url",
                    source.id
                )));
            }
            if !seen.insert(&source.id) {
                return Err(ConfigError::DuplicateSource(source.id.to_string()));
            }
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(bind) = self.server.bind {
            config = config.bind(bind);
        }
        if let Some(boundary) = &self.server.boundary {
            config = config.boundary(boundary.as_str());
        }
        config
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session.to_session_config()
    }
}

impl std::str::FromStr for RelayConfig {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let config: RelayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

impl SessionSettings {
    /// Apply the set keys over the defaults
    pub fn to_session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        SessionConfig::default()
            .connect_retry(
                self.connect_attempts.unwrap_or(defaults.connect_attempts),
                ms(self.connect_retry_delay_ms, defaults.connect_retry_delay),
            )
            .idle_cycles(self.idle_cycles.unwrap_or(defaults.idle_cycles))
            .read_timeout(ms(self.read_timeout_ms, defaults.read_timeout))
            .read_error_limits(
                self.max_read_errors.unwrap_or(defaults.max_read_errors),
                self.max_reconnects.unwrap_or(defaults.max_reconnects),
            )
            .stream_wait(
                self.stream_wait_attempts
                    .unwrap_or(defaults.stream_wait_attempts),
                ms(self.stream_wait_interval_ms, defaults.stream_wait_interval),
            )
            .snapshot_wait(
                self.snapshot_wait_attempts
                    .unwrap_or(defaults.snapshot_wait_attempts),
                ms(
                    self.snapshot_wait_interval_ms,
                    defaults.snapshot_wait_interval,
                ),
            )
            .jpeg_quality(self.jpeg_quality.unwrap_or(defaults.jpeg_quality))
            .max_frame_size(self.max_frame_size.unwrap_or(defaults.max_frame_size))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
[server]
bind = "127.0.0.1:8085"

[session]
connect_attempts = 15
connect_retry_delay_ms = 100
idle_cycles = 25

[[sources]]
id = "HallCam"
url = "http://192.168.1.154:8085/video"

[[sources]]
id = "kitchencam"
url = "http://192.168.1.155:8085/video"
"#;

    #[test]
    fn test_parse_sample() {
        let config: RelayConfig = SAMPLE.parse().unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].id.as_str(), "hallcam");

        let server = config.server_config();
        assert_eq!(server.bind_addr, "127.0.0.1:8085".parse().unwrap());
        assert_eq!(server.boundary, "frame");

        let session = config.session_config();
        assert_eq!(session.connect_attempts, 15);
        assert_eq!(session.connect_retry_delay, Duration::from_millis(100));
        assert_eq!(session.idle_cycles, 25);
        assert_eq!(session.stream_wait_attempts, 20);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: RelayConfig = "".parse().unwrap();

        assert!(config.sources.is_empty());
        assert_eq!(config.server_config(), ServerConfig::default());
        assert_eq!(config.session_config(), SessionConfig::default());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"
[[sources]]
id = "hallcam"
url = "http://a"

[[sources]]
id = "HALLCAM"
url = "http://b"
"#;

        let result: Result<RelayConfig, _> = text.parse();
        assert!(matches!(result, Err(ConfigError::DuplicateSource(id)) if id == "hallcam"));
    }

    #[test]
    fn test_missing_url_rejected() {
        let text = "[[sources]]\nid = \"hallcam\"\nurl = \" \"\n";

        let result: Result<RelayConfig, _> = text.parse();
        assert!(matches!(result, Err(ConfigError::InvalidSource(_))));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = "[session]\nidle_cycle = 3\n";

        let result: Result<RelayConfig, _> = text.parse();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_from_missing_file() {
        let result = RelayConfig::from_file("/nonexistent/relay.toml");
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }
}
