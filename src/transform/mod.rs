//! Transform layer: event records to wired node tuples
//!
//! Records are dispatched by kind to one family's handler table. Each
//! handler returns a [`NodeTuple`] whose first node is the acting process.
//! The [`Pipeline`] pulls records from a datasource, threads one
//! [`PipelineContext`] through every handler, and pushes tuples into a
//! [`GraphSink`].

pub mod cancel;
pub mod context;
pub mod dispatch;
pub mod edr;
pub mod error;
pub mod event;
pub mod generic;
pub mod graph_sink;
pub mod paths;
pub mod pipeline;
pub mod provenance;
pub mod sink;
pub mod types;

pub use cancel::CancellationToken;
pub use context::{PipelineContext, RunTotals};
pub use dispatch::{AlertEnvelope, Dispatcher, Family, HandlerFn, HandlerTable, TransformerFamily};
pub use edr::EdrFamily;
pub use error::TransformError;
pub use event::{EventRecord, KIND_FIELD};
pub use generic::GenericFamily;
pub use graph_sink::GraphBuilder;
pub use paths::{split_path, split_reg_path, try_split_path, PathParts, RegistryPath};
pub use pipeline::{Pipeline, PipelineError, Run, RunSummary};
pub use provenance::ProvenanceFamily;
pub use sink::{EmitResult, GraphSink, SinkError};
pub use types::NodeTuple;
