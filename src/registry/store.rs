//! Session registry implementation
//!
//! Maps source ids to their sessions. Sessions are created on first use and
//! kept for the life of the registry; only their internal state cycles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::session::{SessionState, SessionStatus, StreamSession};
use crate::stats::SessionStats;
use crate::upstream::UpstreamConnector;

use super::config::SessionConfig;
use super::source::{SourceConfig, SourceId};

/// Central registry for all relay sessions
///
/// Thread-safe via `RwLock`. Lookups of existing sessions only take the
/// read lock; the write lock is held just long enough to insert a new one.
pub struct SessionRegistry {
    /// Static source table
    sources: HashMap<SourceId, SourceConfig>,

    /// Sessions created so far
    sessions: RwLock<HashMap<SourceId, Arc<StreamSession>>>,

    connector: Arc<dyn UpstreamConnector>,

    config: Arc<SessionConfig>,
}

impl SessionRegistry {
    /// Create a registry for a fixed set of sources
    ///
    /// Fails if two sources share an id.
    pub fn new(
        sources: impl IntoIterator<Item = SourceConfig>,
        connector: Arc<dyn UpstreamConnector>,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        let mut table = HashMap::new();
        for source in sources {
            if source.id.as_str().is_empty() {
                return Err(ConfigError::InvalidSource("empty camera id".into()));
            }
            if table.contains_key(&source.id) {
                return Err(ConfigError::DuplicateSource(source.id.to_string()));
            }
            table.insert(source.id.clone(), source);
        }

        Ok(Self {
            sources: table,
            sessions: RwLock::new(HashMap::new()),
            connector,
            config: Arc::new(config),
        })
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the session for a source, creating it on first use
    ///
    /// Concurrent first calls for the same id all get the same session.
    pub async fn acquire(&self, id: &SourceId) -> Result<Arc<StreamSession>, ConfigError> {
        let source = self
            .sources
            .get(id)
            .ok_or_else(|| ConfigError::UnknownSource(id.to_string()))?;

        if let Some(session) = self.sessions.read().await.get(id) {
            return Ok(Arc::clone(session));
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!(source = %id, url = %source.url, "Session created");
            Arc::new(StreamSession::new(
                source.clone(),
                Arc::clone(&self.connector),
                Arc::clone(&self.config),
            ))
        });

        Ok(Arc::clone(session))
    }

    /// Get an existing session without creating one
    pub async fn session(&self, id: &SourceId) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Configured sources, ordered by id
    pub fn sources(&self) -> Vec<&SourceConfig> {
        let mut sources: Vec<_> = self.sources.values().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    /// Get the number of sessions created so far
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Status of every configured source
    ///
    /// Sources that never had a session are reported idle.
    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let sessions: Vec<_> = {
            let map = self.sessions.read().await;
            self.sources()
                .into_iter()
                .map(|source| (source.id.clone(), map.get(&source.id).cloned()))
                .collect()
        };

        let mut statuses = Vec::with_capacity(sessions.len());
        for (id, session) in sessions {
            statuses.push(match session {
                Some(session) => session.status().await,
                None => SessionStatus {
                    id,
                    state: SessionState::Idle,
                    demand: 0,
                    connected: false,
                    version: 0,
                    average_fps: 0.0,
                    stats: SessionStats::default(),
                },
            });
        }
        statuses
    }

    /// Get statistics for a session
    pub async fn session_stats(&self, id: &SourceId) -> Option<SessionStats> {
        self.session(id).await.map(|session| session.stats())
    }

    /// Stop every session's capture loop
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();

        tracing::info!(sessions = sessions.len(), "Stopping all sessions");

        for session in sessions {
            session.stop().await;
        }
    }
}
