//! GraphSink trait and emission result types
//!
//! The sink is the boundary towards backends: the pipeline pushes every
//! non-empty node tuple through `emit()`, and the backend performs the
//! identity-based upsert and relation-list union.

use super::types::NodeTuple;
use async_trait::async_trait;
use thiserror::Error;

/// What one `emit()` did to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitResult {
    /// Vertices that did not exist before
    pub nodes_created: usize,
    /// Vertices merged into an existing identity
    pub nodes_merged: usize,
    /// Relation occurrences carried by the tuple
    pub occurrences: usize,
}

impl EmitResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.nodes_created == 0 && self.nodes_merged == 0
    }

    pub fn accumulate(&mut self, other: EmitResult) {
        self.nodes_created += other.nodes_created;
        self.nodes_merged += other.nodes_merged;
        self.occurrences += other.occurrences;
    }
}

/// Backend failures. Unlike per-event transform errors, these end the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The interface through which the pipeline hands node tuples to a backend.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn emit(&self, tuple: NodeTuple) -> Result<EmitResult, SinkError>;
}
