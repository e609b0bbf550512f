//! SharedGraph: a concurrent merge index for independent runs

use super::assembly::{Graph, GraphMetadata, Upsert};
use super::node::{Node, NodeId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by graph assembly
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cannot merge {found} into {expected}: identities differ")]
    IdentityMismatch { expected: String, found: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Merge index shared between concurrently running pipelines.
///
/// Node identity and merge are commutative, so this is the only place that
/// needs synchronization when several datasources are processed in parallel.
#[derive(Debug, Default)]
pub struct SharedGraph {
    nodes: DashMap<NodeId, Node>,
    metadata: Mutex<GraphMetadata>,
}

impl SharedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a node by identity
    pub fn insert(&self, node: Node) -> Upsert {
        let id = node.id();
        match self.nodes.entry(id) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().absorb(node);
                Upsert::Merged(id)
            }
            Entry::Vacant(slot) => {
                slot.insert(node);
                Upsert::Created(id)
            }
        }
    }

    /// Fold a finished per-run graph into the shared index
    pub fn absorb_graph(&self, mut graph: Graph) {
        let metadata = std::mem::take(&mut graph.metadata);
        for node in graph.into_nodes() {
            self.insert(node);
        }
        if let Ok(mut shared) = self.metadata.lock() {
            for (k, v) in metadata.datasource {
                shared.datasource.entry(k).or_insert(v);
            }
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.nodes.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Freeze into a [`Graph`]; vertices are ordered by id since arrival order
    /// across threads is not meaningful.
    pub fn into_graph(self) -> Graph {
        let mut nodes: Vec<Node> = self.nodes.into_iter().map(|(_, node)| node).collect();
        nodes.sort_by_key(|node| node.id());

        let mut metadata = self.metadata.into_inner().unwrap_or_default();
        if metadata.created_at.is_none() {
            metadata.created_at = Some(chrono::Utc::now());
        }

        let mut graph = Graph::new().with_metadata(metadata);
        graph.extend(nodes);
        graph
    }
}
