//! Node tuples: the output of transforming one event

use crate::graph::{Alert, Attributes, Node, RelationKind};

/// The nodes produced from one event, relations already wired.
///
/// When non-empty, the first element is the primary anchor (the acting
/// process, or the alert wrapping an alerted-on event).
#[derive(Debug, Clone, Default)]
pub struct NodeTuple {
    nodes: Vec<Node>,
}

impl NodeTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn anchor(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Prefix an alert node related `alerted_on` to every node already here.
    ///
    /// Each relation gets a copy of `attributes` (typically `{timestamp}` or
    /// nothing at all).
    pub fn wrap_alert(self, alert: Alert, attributes: Attributes) -> NodeTuple {
        let mut alert = Node::new(alert);
        for node in &self.nodes {
            alert.add_relation(RelationKind::AlertedOn, node, attributes.clone());
        }
        let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
        nodes.push(alert);
        nodes.extend(self.nodes);
        NodeTuple { nodes }
    }
}

impl FromIterator<Node> for NodeTuple {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Node>> for NodeTuple {
    fn from(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

impl IntoIterator for NodeTuple {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeTuple {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
