//! Event dispatch: one entry point, one handler table per family
//!
//! Every family is polymorphic over its input shape and monomorphic over
//! its output: all handlers produce the same Node/Relation model, so graph
//! assembly never needs to know which family produced a node.

use super::context::PipelineContext;
use super::edr::EdrFamily;
use super::error::TransformError;
use super::event::{EventRecord, KIND_FIELD};
use super::generic::GenericFamily;
use super::provenance::ProvenanceFamily;
use super::types::NodeTuple;
use crate::graph::{Alert, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// A handler turns one record into a tuple of wired nodes
pub type HandlerFn = fn(&EventRecord, &mut PipelineContext) -> Result<NodeTuple, TransformError>;

/// Kind -> handler, for one family
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<&'static str, HandlerFn>,
    order: Vec<&'static str>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a later registration for the same kind replaces it
    pub fn register(&mut self, kind: &'static str, handler: HandlerFn) -> &mut Self {
        if self.handlers.insert(kind, handler).is_none() {
            self.order.push(kind);
        }
        self
    }

    pub fn get(&self, kind: &str) -> Option<HandlerFn> {
        self.handlers.get(kind).copied()
    }

    /// Registered kinds, in registration order
    pub fn kinds(&self) -> &[&'static str] {
        &self.order
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.order).finish()
    }
}

/// An alert split off from the event it alerted on
#[derive(Debug, Clone)]
pub struct AlertEnvelope {
    pub alert: Alert,
    pub inner: EventRecord,
    /// Attribute record for each `alerted_on` relation
    pub attributes: Attributes,
}

/// A family of input shapes sharing one handler table
pub trait TransformerFamily: Send + Sync {
    fn family(&self) -> Family;

    fn register_handlers(&self, table: &mut HandlerTable);

    /// Whether a record is worth dispatching at all. Rejected records are
    /// counted as filtered, not as errors.
    fn accepts(&self, _record: &EventRecord) -> bool {
        true
    }

    /// Split an alert-bearing record into the alert and the event it wraps
    fn unwrap_alert(&self, _record: &EventRecord) -> Result<Option<AlertEnvelope>, TransformError> {
        Ok(None)
    }
}

/// Built-in transformer families
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Canonical, already-normalized events
    #[default]
    Generic,
    /// Endpoint triage exports
    Edr,
    /// System provenance logs (CDM records keyed by UUID)
    Provenance,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Generic, Family::Edr, Family::Provenance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Edr => "edr",
            Self::Provenance => "provenance",
        }
    }

    pub fn transformer(&self) -> Box<dyn TransformerFamily> {
        match self {
            Self::Generic => Box::new(GenericFamily),
            Self::Edr => Box::new(EdrFamily),
            Self::Provenance => Box::new(ProvenanceFamily),
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "edr" => Ok(Self::Edr),
            "provenance" => Ok(Self::Provenance),
            other => Err(format!("unknown family: {}", other)),
        }
    }
}

/// Resolves each record's kind against one family's handler table
pub struct Dispatcher {
    family: Box<dyn TransformerFamily>,
    table: HandlerTable,
}

impl Dispatcher {
    pub fn new(family: Box<dyn TransformerFamily>) -> Self {
        let mut table = HandlerTable::new();
        family.register_handlers(&mut table);
        Self { family, table }
    }

    pub fn for_family(family: Family) -> Self {
        Self::new(family.transformer())
    }

    /// Add or replace a handler on top of the family's own table
    pub fn with_handler(mut self, kind: &'static str, handler: HandlerFn) -> Self {
        self.table.register(kind, handler);
        self
    }

    pub fn family(&self) -> Family {
        self.family.family()
    }

    pub fn kinds(&self) -> &[&'static str] {
        self.table.kinds()
    }

    /// Transform one record, surfacing per-event errors.
    ///
    /// When the inner event of an alert cannot be transformed, the alert is
    /// still emitted on its own.
    pub fn try_dispatch(
        &self,
        record: &EventRecord,
        ctx: &mut PipelineContext,
    ) -> Result<NodeTuple, TransformError> {
        if let Some(envelope) = self.family.unwrap_alert(record)? {
            let inner = self.try_dispatch(&envelope.inner, ctx).unwrap_or_else(|err| {
                debug!(error = %err, alert = %envelope.alert.name, "alerted-on event dropped");
                NodeTuple::new()
            });
            return Ok(inner.wrap_alert(envelope.alert, envelope.attributes));
        }

        if !self.family.accepts(record) {
            return Ok(NodeTuple::new());
        }

        let kind = record
            .kind()
            .ok_or_else(|| TransformError::incomplete("untyped", KIND_FIELD))?;
        let handler = self
            .table
            .get(kind)
            .ok_or_else(|| TransformError::UnknownEventKind(kind.to_string()))?;
        handler(record, ctx)
    }

    /// Transform one record. Never fails: errors are logged, counted on the
    /// context, and yield an empty tuple.
    pub fn dispatch(&self, record: &EventRecord, ctx: &mut PipelineContext) -> NodeTuple {
        ctx.totals.events_seen += 1;
        match self.try_dispatch(record, ctx) {
            Ok(tuple) if tuple.is_empty() => {
                trace!(kind = record.kind_label(), "event produced no nodes");
                ctx.totals.filtered += 1;
                tuple
            }
            Ok(tuple) => {
                ctx.totals.tuples_emitted += 1;
                ctx.totals.nodes_emitted += tuple.len();
                tuple
            }
            Err(err) if err.is_unknown() => {
                debug!(error = %err, family = %self.family(), "skipping event");
                ctx.totals.skipped_unknown += 1;
                NodeTuple::new()
            }
            Err(err) => {
                warn!(error = %err, family = %self.family(), "skipping event");
                ctx.totals.skipped_incomplete += 1;
                NodeTuple::new()
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("family", &self.family())
            .field("kinds", &self.kinds())
            .finish()
    }
}
