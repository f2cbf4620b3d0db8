//! Graph routing: turns a session's sound graph into registry layers.
//!
//! Each `sound-source` node may have a prepared source (media already
//! resolved, volume applied) waiting in the executor. A prepared node plays
//! as a registry layer exactly while a path leads from it to an output node.
//!
//! Graph edits are applied incrementally. The first graph for a session
//! starts every connected source. After that, only nodes upstream of an
//! added or removed edge are re-evaluated, so a node that was stopped by
//! hand is not restarted by an unrelated edit.

use crate::graph::{diff_edges, upstream_nodes, GraphEdge, GraphNode, NodeKind, SoundGraph};
use crate::registry::{LayerId, SourceRegistry};
use crate::source::SourceHandle;
use crate::volume::{percent_to_linear, VolumeControl, VolumeSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use voiceconf::RoutingSettings;

/// Media resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unsupported media url: {0}")]
    Unsupported(String),

    #[error("invalid media url: {0}")]
    Invalid(String),

    #[error("media not found: {0}")]
    NotFound(String),

    #[error("media backend failed: {0}")]
    Backend(String),
}

/// Routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node {0} has no prepared source")]
    NotPrepared(String),

    #[error("failed to prepare node {node}: {source}")]
    Resolve {
        node: String,
        #[source]
        source: ResolveError,
    },
}

/// What to resolve for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub url: String,
    /// Percentage, 0-200
    #[serde(default)]
    pub volume: Option<u32>,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            volume: None,
        }
    }

    pub fn with_volume(mut self, percent: u32) -> Self {
        self.volume = Some(percent);
        self
    }
}

/// Turns a media request into a playable source.
///
/// Called without any engine lock held; implementations may do network I/O.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, request: &MediaRequest) -> Result<SourceHandle, ResolveError>;
}

/// A resolved source waiting for a route to output.
#[derive(Debug, Clone)]
pub struct PreparedSource {
    pub source: SourceHandle,
    pub volume: VolumeControl,
    pub url: String,
}

/// Status of one prepared or playing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub layer_id: Option<LayerId>,
    pub playing: bool,
    pub volume: u32,
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Per-session routing state.
pub struct GraphExecutor {
    registry: Arc<SourceRegistry>,
    settings: RoutingSettings,
    graph: Option<SoundGraph>,
    prepared: HashMap<String, PreparedSource>,
    active: HashMap<String, LayerId>,
}

impl GraphExecutor {
    pub fn new(registry: Arc<SourceRegistry>, settings: RoutingSettings) -> Self {
        Self {
            registry,
            settings,
            graph: None,
            prepared: HashMap::new(),
            active: HashMap::new(),
        }
    }

    // === Graph ===

    /// The session graph, created with a single output node on first use.
    pub fn get_graph(&mut self) -> &SoundGraph {
        let output_id = &self.settings.output_node_id;
        self.graph
            .get_or_insert_with(|| SoundGraph::with_output(output_id))
    }

    /// Replace the graph and start/stop sources whose route changed.
    ///
    /// Nodes missing from the new graph are unloaded.
    pub fn update_graph(&mut self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> &SoundGraph {
        let new_graph = SoundGraph::new(nodes, edges);

        let (stop, start, deleted) = match &self.graph {
            None => {
                let connected = new_graph.connected_source_nodes();
                info!("Initial graph: {} connected sources", connected.len());
                (Vec::new(), connected, Vec::new())
            }
            Some(old) => {
                let (stop, start) = plan_edit(old, &new_graph);
                let deleted: Vec<String> = old
                    .nodes
                    .iter()
                    .filter(|n| new_graph.node(&n.id).is_none())
                    .map(|n| n.id.clone())
                    .collect();
                (stop, start, deleted)
            }
        };
        self.graph = Some(new_graph);

        for node_id in &stop {
            self.demote(node_id);
        }
        for node_id in &deleted {
            if self.unload_node(node_id) {
                debug!("Node {} deleted from graph", node_id);
            }
        }
        for node_id in &start {
            self.promote(node_id);
        }

        self.get_graph()
    }

    fn node_reaches_output(&self, node_id: &str) -> bool {
        self.graph
            .as_ref()
            .is_some_and(|g| g.has_path_to_output(node_id))
    }

    // === Promotion ===

    /// Start a prepared node as a layer. Already-playing nodes keep their layer.
    fn promote(&mut self, node_id: &str) -> Option<LayerId> {
        if let Some(layer_id) = self.active.get(node_id) {
            if self.registry.has_layer(*layer_id) {
                return Some(*layer_id);
            }
            // Layer ended on its own since we last looked
            self.active.remove(node_id);
        }
        let Some(prepared) = self.prepared.get(node_id) else {
            debug!("Node {} reaches output but has no prepared source", node_id);
            return None;
        };
        let layer_id = self.registry.add_layer(prepared.source.clone());
        info!("Node {} playing as layer {}", node_id, layer_id);
        self.active.insert(node_id.to_string(), layer_id);
        Some(layer_id)
    }

    /// Stop a node's layer, keeping its prepared source for later.
    fn demote(&mut self, node_id: &str) -> bool {
        let Some(layer_id) = self.active.remove(node_id) else {
            return false;
        };
        let detached = self.registry.detach_layer(layer_id).is_some();
        if detached {
            info!("Node {} stopped (layer {})", node_id, layer_id);
        }
        detached
    }

    // === Node operations ===

    /// Resolve media for a node and keep it prepared.
    ///
    /// A previous source for the node is stopped and cleaned up. If the node
    /// already reaches output it starts playing immediately.
    pub async fn prepare_source(
        &mut self,
        node_id: &str,
        request: &MediaRequest,
        resolver: &dyn MediaResolver,
    ) -> Result<Option<LayerId>, RoutingError> {
        let resolved = resolver
            .resolve(request)
            .await
            .map_err(|source| RoutingError::Resolve {
                node: node_id.to_string(),
                source,
            })?;

        let percent = request
            .volume
            .or_else(|| self.node_volume(node_id))
            .unwrap_or(self.settings.default_volume);
        let wrapped = VolumeSource::new(resolved, percent_to_linear(percent));
        let volume = wrapped.control();
        let prepared = PreparedSource {
            source: SourceHandle::new(wrapped),
            volume,
            url: request.url.clone(),
        };

        if let Some(previous) = self.prepared.remove(node_id) {
            self.demote(node_id);
            previous.source.cleanup();
        }
        debug!("Prepared node {} from {}", node_id, request.url);
        self.prepared.insert(node_id.to_string(), prepared);

        if self.node_reaches_output(node_id) {
            Ok(self.promote(node_id))
        } else {
            Ok(None)
        }
    }

    /// Start a prepared node regardless of routing.
    pub fn start_source_playback(&mut self, node_id: &str) -> Result<LayerId, RoutingError> {
        self.promote(node_id)
            .ok_or_else(|| RoutingError::NotPrepared(node_id.to_string()))
    }

    /// Stop a node, keeping it prepared. Returns false if it was not playing.
    pub fn stop_source_playback(&mut self, node_id: &str) -> bool {
        self.demote(node_id)
    }

    /// Stop a node and discard its prepared source.
    pub fn unload_node(&mut self, node_id: &str) -> bool {
        self.demote(node_id);
        match self.prepared.remove(node_id) {
            Some(prepared) => {
                prepared.source.cleanup();
                info!("Unloaded node {}", node_id);
                true
            }
            None => false,
        }
    }

    pub fn is_source_playing(&self, node_id: &str) -> bool {
        self.active
            .get(node_id)
            .is_some_and(|layer_id| self.registry.has_layer(*layer_id))
    }

    pub fn is_prepared(&self, node_id: &str) -> bool {
        self.prepared.contains_key(node_id)
    }

    /// Set a node's volume (0-200%), live if it is prepared.
    pub fn set_node_volume(&mut self, node_id: &str, percent: u32) -> Result<(), RoutingError> {
        let percent = percent.min(200);
        let mut known = false;
        if let Some(node) = self.graph.as_mut().and_then(|g| g.node_mut(node_id)) {
            node.set_data("volume", json!(percent));
            known = true;
        }
        if let Some(prepared) = self.prepared.get(node_id) {
            prepared.volume.set_percent(percent);
            known = true;
        }
        if known {
            Ok(())
        } else {
            Err(RoutingError::UnknownNode(node_id.to_string()))
        }
    }

    /// Record the loop flag on a graph node.
    pub fn set_node_loop(&mut self, node_id: &str, looping: bool) -> Result<(), RoutingError> {
        let node = self
            .graph
            .as_mut()
            .and_then(|g| g.node_mut(node_id))
            .ok_or_else(|| RoutingError::UnknownNode(node_id.to_string()))?;
        node.set_data("loop", json!(looping));
        Ok(())
    }

    fn node_volume(&self, node_id: &str) -> Option<u32> {
        self.graph
            .as_ref()?
            .node(node_id)
            .filter(|n| n.kind == NodeKind::SoundSource)?
            .data
            .get("volume")?
            .as_u64()
            .map(|v| v.min(200) as u32)
    }

    /// Node ids currently playing, with their layers.
    pub fn active_layers(&self) -> Vec<(String, LayerId)> {
        let mut layers: Vec<_> = self
            .active
            .iter()
            .filter(|(_, id)| self.registry.has_layer(**id))
            .map(|(node, id)| (node.clone(), *id))
            .collect();
        layers.sort_by(|a, b| a.0.cmp(&b.0));
        layers
    }

    /// One entry per prepared node, sorted by node id.
    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        let mut statuses: Vec<NodeStatus> = self
            .prepared
            .iter()
            .map(|(node_id, prepared)| {
                let playing = self.is_source_playing(node_id);
                let metadata = prepared.source.metadata();
                NodeStatus {
                    node_id: node_id.clone(),
                    layer_id: if playing { self.active.get(node_id).copied() } else { None },
                    playing,
                    volume: prepared.volume.percent(),
                    title: metadata.title,
                    url: metadata.url.or_else(|| Some(prepared.url.clone())),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        statuses
    }

    /// Stop and clean up every prepared source.
    pub fn cleanup(&mut self) {
        let nodes: Vec<String> = self.prepared.keys().cloned().collect();
        for node_id in &nodes {
            self.demote(node_id);
        }
        for (_, prepared) in self.prepared.drain() {
            prepared.source.cleanup();
        }
        if !self.active.is_empty() {
            warn!("{} active layers without a prepared source", self.active.len());
            self.active.clear();
        }
        debug!("Routing cleaned up ({} prepared sources)", nodes.len());
    }
}

/// Nodes to stop and nodes to start when `old` is replaced by `new`.
///
/// Only nodes upstream of a changed edge are considered; each removed edge
/// is traced in the graph it lived in.
fn plan_edit(old: &SoundGraph, new: &SoundGraph) -> (Vec<String>, Vec<String>) {
    let (added, removed) = diff_edges(&old.edges, &new.edges);
    debug!("Graph edit: {} edges added, {} removed", added.len(), removed.len());

    let stop: Vec<String> = removed
        .iter()
        .flat_map(|e| upstream_nodes(&e.source, &old.nodes, &old.edges))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|id| !new.has_path_to_output(id))
        .collect();
    let start: Vec<String> = added
        .iter()
        .flat_map(|e| upstream_nodes(&e.source, &new.nodes, &new.edges))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|id| new.has_path_to_output(id))
        .collect();

    (stop, start)
}
