//! Relations: typed, directed, multi-occurrence links between nodes

use super::node::{NodeId, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One occurrence's attribute record, e.g. `{timestamp, port, protocol}`
pub type Attributes = BTreeMap<String, PropertyValue>;

/// Closed relation vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Launched,
    Wrote,
    Accessed,
    Deleted,
    Loaded,
    Copied,
    CopiedTo,
    FileOf,
    ConnectedTo,
    DnsQueryFor,
    ResolvesTo,
    HttpRequestTo,
    UriOf,
    ReadKey,
    ChangedValue,
    CreatedKey,
    DeletedKey,
    DeletedValue,
    AlertedOn,
}

impl RelationKind {
    pub const ALL: [RelationKind; 19] = [
        Self::Launched,
        Self::Wrote,
        Self::Accessed,
        Self::Deleted,
        Self::Loaded,
        Self::Copied,
        Self::CopiedTo,
        Self::FileOf,
        Self::ConnectedTo,
        Self::DnsQueryFor,
        Self::ResolvesTo,
        Self::HttpRequestTo,
        Self::UriOf,
        Self::ReadKey,
        Self::ChangedValue,
        Self::CreatedKey,
        Self::DeletedKey,
        Self::DeletedValue,
        Self::AlertedOn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launched => "launched",
            Self::Wrote => "wrote",
            Self::Accessed => "accessed",
            Self::Deleted => "deleted",
            Self::Loaded => "loaded",
            Self::Copied => "copied",
            Self::CopiedTo => "copied_to",
            Self::FileOf => "file_of",
            Self::ConnectedTo => "connected_to",
            Self::DnsQueryFor => "dns_query_for",
            Self::ResolvesTo => "resolves_to",
            Self::HttpRequestTo => "http_request_to",
            Self::UriOf => "uri_of",
            Self::ReadKey => "read_key",
            Self::ChangedValue => "changed_value",
            Self::CreatedKey => "created_key",
            Self::DeletedKey => "deleted_key",
            Self::DeletedValue => "deleted_value",
            Self::AlertedOn => "alerted_on",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown relation kind: {}", s))
    }
}

/// All occurrences of one (kind, target) pair, owned by the source node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: NodeId,
    pub occurrences: Vec<Attributes>,
}

/// Per-node relation accumulator.
///
/// Entries keep the order in which each (kind, target) pair was first seen.
/// Nothing is ever removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Relation>", into = "Vec<Relation>")]
pub struct Relations {
    entries: Vec<Relation>,
    index: HashMap<(RelationKind, NodeId), usize>,
}

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the entry for (kind, target)
    pub fn ensure(&mut self, kind: RelationKind, target: NodeId) -> &mut Relation {
        let idx = match self.index.get(&(kind, target)) {
            Some(&idx) => idx,
            None => {
                self.entries.push(Relation {
                    kind,
                    target,
                    occurrences: Vec::new(),
                });
                let idx = self.entries.len() - 1;
                self.index.insert((kind, target), idx);
                idx
            }
        };
        &mut self.entries[idx]
    }

    /// Append one occurrence
    pub fn record(&mut self, kind: RelationKind, target: NodeId, attributes: Attributes) {
        self.ensure(kind, target).occurrences.push(attributes);
    }

    pub fn get(&self, kind: RelationKind, target: &NodeId) -> Option<&Relation> {
        self.index
            .get(&(kind, *target))
            .map(|&idx| &self.entries[idx])
    }

    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> {
        self.entries.iter().filter(move |r| r.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.entries.iter()
    }

    /// Number of distinct (kind, target) pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total recorded occurrences across all pairs
    pub fn occurrence_count(&self) -> usize {
        self.entries.iter().map(|r| r.occurrences.len()).sum()
    }

    /// Union another accumulator into this one, appending occurrences
    pub fn absorb(&mut self, other: Relations) {
        for relation in other.entries {
            self.ensure(relation.kind, relation.target)
                .occurrences
                .extend(relation.occurrences);
        }
    }
}

impl From<Vec<Relation>> for Relations {
    fn from(entries: Vec<Relation>) -> Self {
        let mut relations = Relations::new();
        for relation in entries {
            relations
                .ensure(relation.kind, relation.target)
                .occurrences
                .extend(relation.occurrences);
        }
        relations
    }
}

impl From<Relations> for Vec<Relation> {
    fn from(relations: Relations) -> Self {
        relations.entries
    }
}

/// How relations are flattened into edges for a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// One edge per recorded occurrence (a multigraph)
    #[default]
    PerOccurrence,
    /// One edge per (source, kind, target) carrying every occurrence
    Consolidated,
}

/// A flattened edge as handed to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: RelationKind,
    pub attributes: Vec<Attributes>,
}

impl Edge {
    /// Flatten one relation according to `mode`.
    ///
    /// A relation that exists without occurrences still yields one edge.
    pub fn from_relation(source: NodeId, relation: &Relation, mode: EdgeMode) -> Vec<Edge> {
        let edge = |attributes: Vec<Attributes>| Edge {
            source,
            target: relation.target,
            kind: relation.kind,
            attributes,
        };
        match mode {
            EdgeMode::Consolidated => vec![edge(relation.occurrences.clone())],
            EdgeMode::PerOccurrence if relation.occurrences.is_empty() => vec![edge(Vec::new())],
            EdgeMode::PerOccurrence => relation
                .occurrences
                .iter()
                .map(|attrs| edge(vec![attrs.clone()]))
                .collect(),
        }
    }
}
