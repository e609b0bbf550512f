//! Trailgraph: security telemetry to entity/relation graphs
//!
//! Turns heterogeneous event records (endpoint triage exports, sandbox
//! reports, provenance logs) into a deduplicated property graph of
//! processes, files, network endpoints, registry keys and alerts.
//!
//! # Core Concepts
//!
//! - **Nodes**: typed entities identified by their defining fields; two nodes
//!   with the same identity are the same vertex
//! - **Relations**: multi-edges that keep one attribute record per occurrence
//! - **Families**: per-vendor handler tables that all emit the same model
//!
//! # Example
//!
//! ```
//! use trailgraph::{EventRecord, Family, MemorySource, Pipeline};
//!
//! let source = MemorySource::new("demo", Family::Generic).with_records(vec![
//!     EventRecord::of_kind("dns_lookup")
//!         .with("process_image", "cmd.exe")
//!         .with("process_image_path", "C:\\Windows")
//!         .with("http_host", "example.test"),
//! ]);
//! let pipeline = Pipeline::new(Family::Generic);
//! let tuples: Vec<_> = pipeline.start(&source).unwrap().collect();
//! assert_eq!(tuples.len(), 1);
//! ```

pub mod config;
pub mod datasource;
pub mod graph;
pub mod transform;

pub use config::{ConfigError, PipelineConfig};
pub use datasource::{
    Datasource, DatasourceError, EventStream, JsonLinesSource, MemorySource, ReportSource,
};
pub use graph::{
    EdgeMode, Entity, Graph, GraphError, GraphMetadata, IdentityKey, Node, NodeId, NodeKind,
    PropertyValue, Relation, RelationKind, SharedGraph,
};
pub use transform::{
    CancellationToken, Dispatcher, EventRecord, Family, GraphBuilder, GraphSink, NodeTuple,
    Pipeline, PipelineError, RunSummary, TransformError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
