//! In-memory sinks backed by the graph layer

use super::sink::{EmitResult, GraphSink, SinkError};
use super::types::NodeTuple;
use crate::graph::{Graph, GraphMetadata, SharedGraph, Upsert};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

fn tally(result: &mut EmitResult, occurrences: usize, upsert: Upsert) {
    match upsert {
        Upsert::Created(_) => result.nodes_created += 1,
        Upsert::Merged(_) => result.nodes_merged += 1,
    }
    result.occurrences += occurrences;
}

/// Builds one [`Graph`] from everything emitted into it
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Mutex<Graph>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(Graph::new()),
        }
    }

    pub fn with_metadata(metadata: GraphMetadata) -> Self {
        Self {
            graph: Mutex::new(Graph::new().with_metadata(metadata)),
        }
    }

    /// Apply run metadata without replacing what is already set
    pub fn annotate(&self, metadata: GraphMetadata) {
        if let Ok(mut graph) = self.graph.lock() {
            let current = &mut graph.metadata;
            if current.source.is_none() {
                current.source = metadata.source;
            }
            if current.family.is_none() {
                current.family = metadata.family;
            }
            for (k, v) in metadata.datasource {
                current.datasource.entry(k).or_insert(v);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.lock().map(|g| g.node_count()).unwrap_or_default()
    }

    pub fn into_graph(self) -> Graph {
        self.graph
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GraphSink for GraphBuilder {
    async fn emit(&self, tuple: NodeTuple) -> Result<EmitResult, SinkError> {
        let mut graph = self
            .graph
            .lock()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let mut result = EmitResult::empty();
        for node in tuple {
            let occurrences = node.relations().occurrence_count();
            tally(&mut result, occurrences, graph.insert(node));
        }
        Ok(result)
    }
}

#[async_trait]
impl GraphSink for SharedGraph {
    async fn emit(&self, tuple: NodeTuple) -> Result<EmitResult, SinkError> {
        let mut result = EmitResult::empty();
        for node in tuple {
            let occurrences = node.relations().occurrence_count();
            tally(&mut result, occurrences, self.insert(node));
        }
        Ok(result)
    }
}

#[async_trait]
impl<S: GraphSink + ?Sized> GraphSink for Arc<S> {
    async fn emit(&self, tuple: NodeTuple) -> Result<EmitResult, SinkError> {
        (**self).emit(tuple).await
    }
}
