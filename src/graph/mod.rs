//! Core graph data structures

mod assembly;
mod edge;
mod engine;
mod entity;
mod node;

pub use assembly::{Graph, GraphMetadata, GraphSnapshot, NodeView, Upsert};
pub use edge::{Attributes, Edge, EdgeMode, Relation, RelationKind, Relations};
pub use engine::{GraphError, GraphResult, SharedGraph};
pub use entity::{
    join_path, Alert, CustomEntity, Domain, Entity, File, Hashes, IpAddress, Process, RegistryKey,
    Uri,
};
pub use node::{IdentityKey, Node, NodeId, NodeKind, PropertyValue};
