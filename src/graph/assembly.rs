//! Graph assembly: an identity-keyed arena of merged nodes

use super::edge::{Edge, EdgeMode};
use super::engine::GraphResult;
use super::node::{IdentityKey, Node, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run-level metadata stored alongside a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub created_at: Option<DateTime<Utc>>,
    /// Name of the datasource the graph was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Transformer family that produced the nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Side-channel metadata handed over by the datasource (reputation, sample info)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub datasource: serde_json::Map<String, serde_json::Value>,
}

/// Whether an insert created a vertex or merged into an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created(NodeId),
    Merged(NodeId),
}

impl Upsert {
    pub fn id(&self) -> NodeId {
        match self {
            Self::Created(id) | Self::Merged(id) => *id,
        }
    }
}

/// An in-memory multigraph assembled from node tuples.
///
/// Every identity key maps to exactly one vertex; inserting a node whose
/// identity is already present merges it (fields fill, relation lists union).
/// The final vertex set and relation contents do not depend on insertion order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    /// First-insertion order, for stable exports
    order: Vec<NodeId>,
    pub metadata: GraphMetadata,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            metadata: GraphMetadata {
                created_at: Some(Utc::now()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: GraphMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert or merge a node by identity
    pub fn insert(&mut self, node: Node) -> Upsert {
        let id = node.id();
        match self.nodes.get_mut(&id) {
            Some(existing) => {
                existing.absorb(node);
                Upsert::Merged(id)
            }
            None => {
                self.nodes.insert(id, node);
                self.order.push(id);
                Upsert::Created(id)
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = Node>>(&mut self, nodes: I) {
        for node in nodes {
            self.insert(node);
        }
    }

    /// Merge another graph into this one. Metadata already present here wins.
    pub fn merge(&mut self, mut other: Graph) {
        for id in std::mem::take(&mut other.order) {
            if let Some(node) = other.nodes.remove(&id) {
                self.insert(node);
            }
        }
        if self.metadata.source.is_none() {
            self.metadata.source = other.metadata.source;
        }
        if self.metadata.family.is_none() {
            self.metadata.family = other.metadata.family;
        }
        for (k, v) in other.metadata.datasource {
            self.metadata.datasource.entry(k).or_insert(v);
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_by_key(&self, key: &IdentityKey) -> Option<&Node> {
        self.nodes.get(&NodeId::from_key(key))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Vertices in first-insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges flattened from every vertex's relations
    pub fn edges(&self, mode: EdgeMode) -> Vec<Edge> {
        self.nodes()
            .flat_map(|node| {
                node.relation_entries()
                    .flat_map(move |rel| Edge::from_relation(node.id(), rel, mode))
            })
            .collect()
    }

    pub fn edge_count(&self, mode: EdgeMode) -> usize {
        self.nodes()
            .flat_map(|node| node.relation_entries())
            .map(|rel| match mode {
                EdgeMode::Consolidated => 1,
                EdgeMode::PerOccurrence => rel.occurrences.len().max(1),
            })
            .sum()
    }

    /// Relation targets that never appeared as a vertex
    pub fn dangling_targets(&self) -> Vec<NodeId> {
        let mut missing: Vec<NodeId> = self
            .nodes()
            .flat_map(|node| node.relation_entries().map(|rel| rel.target))
            .filter(|target| !self.nodes.contains_key(target))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Consume the graph, yielding vertices in first-insertion order
    pub fn into_nodes(mut self) -> Vec<Node> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.nodes.remove(&id))
            .collect()
    }

    pub fn to_json(&self, mode: EdgeMode) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot(mode))?)
    }

    /// Serializable view of the whole graph
    pub fn snapshot(&self, mode: EdgeMode) -> GraphSnapshot {
        GraphSnapshot {
            metadata: self.metadata.clone(),
            nodes: self
                .nodes()
                .map(|node| NodeView {
                    id: node.id(),
                    display: node.display(),
                    entity: node.entity().clone(),
                })
                .collect(),
            edges: self.edges(mode),
        }
    }
}

/// One vertex in a [`GraphSnapshot`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    pub display: String,
    #[serde(flatten)]
    pub entity: super::entity::Entity,
}

/// Backend-neutral export of vertices and flattened edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub metadata: GraphMetadata,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<Edge>,
}
