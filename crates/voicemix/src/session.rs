//! Sessions: one registry, mixer and routing executor per voice connection.
//!
//! Nothing is shared between sessions. [`SessionManager`] is the entry point
//! for callers that address sessions by id.

use crate::graph::{GraphEdge, GraphNode, SoundGraph};
use crate::mixer::{EventKind, FrameMixer, MixerConfig, MixerError, MixerEvent};
use crate::registry::{LayerId, SourceRegistry};
use crate::routing::{GraphExecutor, MediaRequest, MediaResolver, NodeStatus, RoutingError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use voiceconf::VoiceConfig;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session {0}")]
    NotConnected(String),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Everything one voice connection needs to produce audio.
pub struct Session {
    id: String,
    registry: Arc<SourceRegistry>,
    mixer: Arc<FrameMixer>,
    executor: GraphExecutor,
}

impl Session {
    pub fn new(id: impl Into<String>, config: &VoiceConfig) -> Result<Self, SessionError> {
        let id = id.into();
        let registry = Arc::new(SourceRegistry::new());
        let mixer = Arc::new(FrameMixer::new(
            registry.clone(),
            MixerConfig::from(&config.mixer),
        )?);
        let executor = GraphExecutor::new(registry.clone(), config.routing.clone());

        let session_id = id.clone();
        mixer.add_observer(EventKind::QueueEnd, move |event| {
            if let MixerEvent::QueueEnd { source } = event {
                info!("Session {}: queue track {} ended", session_id, source.id());
            }
            Ok(())
        });
        let session_id = id.clone();
        mixer.add_observer(EventKind::TrackEnd, move |event| {
            if let MixerEvent::TrackEnd { sources } = event {
                debug!("Session {}: {} layers ended", session_id, sources.len());
            }
            Ok(())
        });

        info!("Session {} connected", id);
        Ok(Self {
            id,
            registry,
            mixer,
            executor,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// The mixer, for handing to a tick driver.
    pub fn mixer(&self) -> &Arc<FrameMixer> {
        &self.mixer
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut GraphExecutor {
        &mut self.executor
    }

    /// Tear down: registry sources, then prepared sources, then the mixer.
    pub fn disconnect(mut self) {
        self.registry.cleanup_all();
        self.executor.cleanup();
        self.mixer.shutdown();
        info!("Session {} disconnected", self.id);
    }
}

/// Sessions by id.
pub struct SessionManager {
    config: VoiceConfig,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Create a session, tearing down any existing one with the same id.
    pub fn connect(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        if let Some(existing) = self.sessions.remove(id) {
            debug!("Replacing session {}", id);
            existing.disconnect();
        }
        let session = Session::new(id, &self.config)?;
        Ok(self.sessions.entry(id.to_string()).or_insert(session))
    }

    /// Returns false if no such session existed.
    pub fn disconnect(&mut self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some(session) => {
                session.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.disconnect();
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn session(&self, id: &str) -> Result<&Session, SessionError> {
        self.sessions
            .get(id)
            .ok_or_else(|| SessionError::NotConnected(id.to_string()))
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotConnected(id.to_string()))
    }

    // === Session-scoped routing ===

    pub fn get_graph(&mut self, id: &str) -> Result<SoundGraph, SessionError> {
        Ok(self.session_mut(id)?.executor.get_graph().clone())
    }

    pub fn update_graph(
        &mut self,
        id: &str,
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
    ) -> Result<SoundGraph, SessionError> {
        Ok(self
            .session_mut(id)?
            .executor
            .update_graph(nodes, edges)
            .clone())
    }

    pub async fn prepare_source(
        &mut self,
        id: &str,
        node_id: &str,
        request: &MediaRequest,
        resolver: &dyn MediaResolver,
    ) -> Result<Option<LayerId>, SessionError> {
        let session = self.session_mut(id)?;
        Ok(session
            .executor
            .prepare_source(node_id, request, resolver)
            .await?)
    }

    pub fn is_source_playing(&self, id: &str, node_id: &str) -> Result<bool, SessionError> {
        Ok(self.session(id)?.executor.is_source_playing(node_id))
    }

    pub fn unload_node(&mut self, id: &str, node_id: &str) -> Result<bool, SessionError> {
        Ok(self.session_mut(id)?.executor.unload_node(node_id))
    }

    pub fn node_statuses(&self, id: &str) -> Result<Vec<NodeStatus>, SessionError> {
        Ok(self.session(id)?.executor.node_statuses())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceHandle;
    use crate::tone::ToneSource;

    fn config() -> VoiceConfig {
        let mut config = VoiceConfig::default();
        config.mixer.read_workers = 2;
        config
    }

    #[test]
    fn test_unknown_session() {
        let mut manager = SessionManager::new(config());
        assert!(matches!(
            manager.get_graph("nope"),
            Err(SessionError::NotConnected(_))
        ));
        assert!(!manager.disconnect("nope"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut manager = SessionManager::new(config());
        manager.connect("a").unwrap();
        manager.connect("b").unwrap();

        manager
            .get("a")
            .unwrap()
            .registry()
            .add_layer(SourceHandle::new(ToneSource::default()));

        assert_eq!(manager.get("a").unwrap().registry().layer_count(), 1);
        assert_eq!(manager.get("b").unwrap().registry().layer_count(), 0);
        assert_eq!(manager.session_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_disconnect_shuts_down_mixer() {
        let mut manager = SessionManager::new(config());
        let mixer = manager.connect("a").unwrap().mixer().clone();
        mixer
            .registry()
            .add_layer(SourceHandle::new(ToneSource::default()));

        assert!(manager.disconnect("a"));
        assert!(mixer.is_shut_down());
        assert_eq!(mixer.registry().layer_count(), 0);
        assert!(manager.get("a").is_none());
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let mut manager = SessionManager::new(config());
        let first = manager.connect("a").unwrap().mixer().clone();
        manager.connect("a").unwrap();
        assert!(first.is_shut_down());
        assert_eq!(manager.session_ids().len(), 1);
    }
}
