//! Source identifiers and configuration

use serde::{Deserialize, Serialize};

/// Identifier of a configured source
///
/// Ids are case-insensitive; they are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Create a normalized id
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configured upstream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source id
    pub id: SourceId,
    /// Upstream URL handed to the connector
    pub url: String,
}

impl SourceConfig {
    pub fn new(id: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            id: SourceId::new(id),
            url: url.into(),
        }
    }
}
