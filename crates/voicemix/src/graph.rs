//! Sound graph document and reachability queries.
//!
//! The graph is a plain JSON document edited by a UI: nodes with a type and
//! free-form data, and directed edges between node ids. A source is audible
//! when some path leads from it to an `output` node. Cycles are legal.

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, Reversed};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub const DEFAULT_OUTPUT_ID: &str = "output-1";

/// Node type. Unrecognized types are kept verbatim and never routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    SoundSource,
    Playlist,
    Group,
    Mixer,
    Output,
    Other(String),
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sound-source" => NodeKind::SoundSource,
            "playlist" => NodeKind::Playlist,
            "group" => NodeKind::Group,
            "mixer" => NodeKind::Mixer,
            "output" => NodeKind::Output,
            _ => NodeKind::Other(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::SoundSource => "sound-source",
            NodeKind::Playlist => "playlist",
            NodeKind::Group => "group",
            NodeKind::Mixer => "mixer",
            NodeKind::Output => "output",
            NodeKind::Other(s) => s,
        };
        f.write_str(name)
    }
}

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default = "empty_object")]
    pub data: Value,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: empty_object(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set one key in `data`, turning non-object data into an object.
    pub fn set_data(&mut self, key: &str, value: Value) {
        if !self.data.is_object() {
            self.data = empty_object();
        }
        if let Some(map) = self.data.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A session's routing graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundGraph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl SoundGraph {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        Self { nodes, edges }
    }

    /// A graph holding a single output node at full volume.
    pub fn with_output(output_id: &str) -> Self {
        Self {
            nodes: vec![GraphNode::new(output_id, NodeKind::Output).with_data(json!({"volume": 100}))],
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn has_path_to_output(&self, node_id: &str) -> bool {
        has_path_to_output(node_id, &self.nodes, &self.edges)
    }

    pub fn connected_source_nodes(&self) -> Vec<String> {
        find_connected_source_nodes(&self.nodes, &self.edges)
    }
}

impl Default for SoundGraph {
    fn default() -> Self {
        Self::with_output(DEFAULT_OUTPUT_ID)
    }
}

/// Directed adjacency over known nodes. Edges leaving unknown nodes are dropped.
fn adjacency<'a>(nodes: &'a [GraphNode], edges: &'a [GraphEdge]) -> DiGraphMap<&'a str, ()> {
    let mut graph = DiGraphMap::new();
    for node in nodes {
        graph.add_node(node.id.as_str());
    }
    for edge in edges {
        if graph.contains_node(edge.source.as_str()) {
            graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
        }
    }
    graph
}

/// Whether any path leads from `node_id` to an output node.
///
/// An output node reaches itself. Traversal tracks visited nodes, so cycles
/// terminate.
pub fn has_path_to_output(node_id: &str, nodes: &[GraphNode], edges: &[GraphEdge]) -> bool {
    let kinds: HashMap<&str, &NodeKind> = nodes.iter().map(|n| (n.id.as_str(), &n.kind)).collect();
    if !kinds.contains_key(node_id) {
        return false;
    }
    let graph = adjacency(nodes, edges);

    let mut bfs = Bfs::new(&graph, node_id);
    while let Some(current) = bfs.next(&graph) {
        if kinds.get(current) == Some(&&NodeKind::Output) {
            return true;
        }
    }
    false
}

/// Every `sound-source` node that currently reaches an output.
pub fn find_connected_source_nodes(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.kind == NodeKind::SoundSource)
        .filter(|n| has_path_to_output(&n.id, nodes, edges))
        .map(|n| n.id.clone())
        .collect()
}

/// `node_id` and every node with a path into it.
pub fn upstream_nodes(node_id: &str, nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<String> {
    let graph = adjacency(nodes, edges);
    if !graph.contains_node(node_id) {
        return Vec::new();
    }
    let reversed = Reversed(&graph);
    let mut bfs = Bfs::new(reversed, node_id);
    let mut found = Vec::new();
    while let Some(current) = bfs.next(reversed) {
        found.push(current.to_string());
    }
    found
}

/// Edges added and removed going from `old` to `new`, each in sorted order.
pub fn diff_edges(old: &[GraphEdge], new: &[GraphEdge]) -> (Vec<GraphEdge>, Vec<GraphEdge>) {
    let old: BTreeSet<&GraphEdge> = old.iter().collect();
    let new: BTreeSet<&GraphEdge> = new.iter().collect();
    let added = new.difference(&old).map(|e| (*e).clone()).collect();
    let removed = old.difference(&new).map(|e| (*e).clone()).collect();
    (added, removed)
}
