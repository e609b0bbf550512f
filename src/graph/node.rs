//! Node representation: typed entities deduplicated by identity key

use super::edge::{Attributes, Relation, RelationKind, Relations};
use super::engine::{GraphError, GraphResult};
use super::entity::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Namespace for identity-derived node ids. Changing it re-keys every graph.
const NODE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1f, 0x3c, 0x52, 0x8e, 0x0a, 0x4d, 0x9b, 0xa7, 0x21, 0x5e, 0xc4, 0x90, 0x13, 0x7d, 0x2f,
]);

/// Node kind discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Process,
    File,
    IpAddress,
    Domain,
    Uri,
    RegistryKey,
    Alert,
    /// Kinds contributed outside the built-in vocabulary
    Custom(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Process => "process",
            Self::File => "file",
            Self::IpAddress => "ip_address",
            Self::Domain => "domain",
            Self::Uri => "uri",
            Self::RegistryKey => "registry_key",
            Self::Alert => "alert",
            Self::Custom(kind) => kind,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The defining fields of a node.
///
/// Two nodes with equal identity keys are the same logical vertex, however
/// and wherever they were constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub kind: NodeKind,
    pub fields: Vec<String>,
}

impl IdentityKey {
    pub fn new(kind: NodeKind, fields: Vec<String>) -> Self {
        Self { kind, fields }
    }

    /// Length-prefixed encoding; unambiguous even when field values contain separators.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let kind = self.kind.as_str();
        out.extend_from_slice(kind.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(kind.as_bytes());
        for field in &self.fields {
            out.extend_from_slice(field.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(field.as_bytes());
        }
        out
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.fields.join("|"))
    }
}

/// Identity-derived node identifier (UUIDv5 over the identity key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn from_key(key: &IdentityKey) -> Self {
        Self(Uuid::new_v5(&NODE_NAMESPACE, &key.encode()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<&IdentityKey> for NodeId {
    fn from(key: &IdentityKey) -> Self {
        Self::from_key(key)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Converts a JSON value. `null` has no property representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(items) => Some(Self::Array(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            Value::Object(map) => Some(Self::Object(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Plain-text rendering used for custom identity fields
    pub fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// A vertex in the telemetry graph: a typed entity plus its outgoing relations.
///
/// Equality and hashing go through the identity-derived [`NodeId`] only.
/// Relations are the mutable part of a node and never take part in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    entity: Entity,
    #[serde(default, skip_serializing_if = "Relations::is_empty")]
    relations: Relations,
}

impl Node {
    /// Construction never fails; missing fields are whatever defaults the entity carries.
    pub fn new(entity: impl Into<Entity>) -> Self {
        let entity = entity.into();
        let id = NodeId::from_key(&entity.identity());
        Self {
            id,
            entity,
            relations: Relations::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn identity(&self) -> IdentityKey {
        self.entity.identity()
    }

    pub fn kind(&self) -> NodeKind {
        self.entity.kind()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Short label for logs and exports
    pub fn display(&self) -> String {
        self.entity.display()
    }

    /// Append one occurrence of `kind` towards `target`.
    ///
    /// The target is keyed by identity, so repeated calls against logically
    /// equal targets accumulate on the same relation.
    pub fn add_relation(&mut self, kind: RelationKind, target: &Node, attributes: Attributes) {
        self.relations.record(kind, target.id(), attributes);
    }

    /// Ensure the relation exists without recording an occurrence.
    pub fn link(&mut self, kind: RelationKind, target: &Node) {
        self.relations.ensure(kind, target.id());
    }

    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    /// Target -> ordered attribute records, for one relation kind
    pub fn relations_of_kind(
        &self,
        kind: RelationKind,
    ) -> impl Iterator<Item = (&NodeId, &[Attributes])> {
        self.relations
            .of_kind(kind)
            .map(|relation| (&relation.target, relation.occurrences.as_slice()))
    }

    /// Occurrences recorded for `kind` towards `target`, if the relation exists
    pub fn occurrences(&self, kind: RelationKind, target: &NodeId) -> Option<&[Attributes]> {
        self.relations.get(kind, target).map(|r| r.occurrences.as_slice())
    }

    /// Merge another instance of the same vertex into this one.
    ///
    /// Non-defining fields fill in when empty; conflicting scalars keep the
    /// value already held here. Relation lists are appended per (kind, target).
    pub fn merge_from(&mut self, other: Node) -> GraphResult<()> {
        if self.id != other.id {
            return Err(GraphError::IdentityMismatch {
                expected: self.identity().to_string(),
                found: other.identity().to_string(),
            });
        }
        self.absorb(other);
        Ok(())
    }

    /// Same as [`merge_from`](Self::merge_from) for callers that already matched ids.
    pub(crate) fn absorb(&mut self, other: Node) {
        debug_assert_eq!(self.id, other.id);
        self.entity.absorb(other.entity);
        self.relations.absorb(other.relations);
    }

    pub(crate) fn relation_entries(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
