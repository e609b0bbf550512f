//! Typed entities carried by nodes
//!
//! Each entity decides which of its fields are defining (the identity key)
//! and how a second instance of itself folds in.

use super::edge::RelationKind;
use super::node::{IdentityKey, Node, NodeKind, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Digest algorithm -> hex digest
pub type Hashes = BTreeMap<String, String>;

/// Join a directory and a file name with a backslash separator
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else if dir.ends_with('\\') {
        format!("{}{}", dir, name)
    } else {
        format!("{}\\{}", dir, name)
    }
}

fn fill(slot: &mut String, incoming: String) {
    if slot.is_empty() {
        *slot = incoming;
    }
}

fn fill_opt<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if slot.is_none() {
        *slot = incoming;
    }
}

fn union<K: Ord, V>(slot: &mut BTreeMap<K, V>, incoming: BTreeMap<K, V>) {
    for (k, v) in incoming {
        slot.entry(k).or_insert(v);
    }
}

fn guid_key(kind: NodeKind, guid: &str) -> IdentityKey {
    IdentityKey::new(kind, vec![format!("guid:{}", guid)])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub image: String,
    pub image_path: String,
    pub process_id: Option<u32>,
    pub command_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Producer-assigned unique id; replaces the field-based identity when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: Hashes,
}

impl Process {
    pub fn new(image: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            image_path: image_path.into(),
            ..Default::default()
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            ..Default::default()
        }
    }

    /// Full path of the process image
    pub fn process_path(&self) -> String {
        join_path(&self.image_path, &self.image)
    }

    /// The on-disk image this process was started from
    pub fn image_file(&self) -> File {
        File {
            name: self.image.clone(),
            path: self.image_path.clone(),
            hashes: self.hashes.clone(),
            host: self.host.clone(),
            extension: extension_of(&self.image),
            guid: None,
        }
    }

    /// Image File node, already wired `file_of` towards this process
    pub fn file_node(&self) -> Node {
        let mut file = Node::new(self.image_file());
        file.link(RelationKind::FileOf, &Node::new(self.clone()));
        file
    }

    fn identity(&self) -> IdentityKey {
        if let Some(guid) = &self.guid {
            return guid_key(NodeKind::Process, guid);
        }
        IdentityKey::new(
            NodeKind::Process,
            vec![
                self.image.clone(),
                self.image_path.clone(),
                self.process_id.map(|p| p.to_string()).unwrap_or_default(),
                self.command_line.clone(),
            ],
        )
    }

    fn absorb(&mut self, other: Process) {
        fill(&mut self.image, other.image);
        fill(&mut self.image_path, other.image_path);
        fill_opt(&mut self.process_id, other.process_id);
        fill(&mut self.command_line, other.command_line);
        fill_opt(&mut self.host, other.host);
        fill_opt(&mut self.user, other.user);
        union(&mut self.hashes, other.hashes);
    }
}

fn extension_of(name: &str) -> Option<String> {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl File {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            extension: extension_of(&name),
            name,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_hashes(mut self, hashes: Hashes) -> Self {
        self.hashes = hashes;
        self
    }

    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            ..Default::default()
        }
    }

    pub fn full_path(&self) -> String {
        join_path(&self.path, &self.name)
    }

    fn identity(&self) -> IdentityKey {
        if let Some(guid) = &self.guid {
            return guid_key(NodeKind::File, guid);
        }
        let mut fields = vec![self.full_path()];
        fields.extend(self.hashes.iter().map(|(alg, digest)| format!("{}={}", alg, digest)));
        IdentityKey::new(NodeKind::File, fields)
    }

    fn absorb(&mut self, other: File) {
        fill(&mut self.name, other.name);
        fill(&mut self.path, other.path);
        union(&mut self.hashes, other.hashes);
        fill_opt(&mut self.host, other.host);
        fill_opt(&mut self.extension, other.extension);
        if self.extension.is_none() {
            self.extension = extension_of(&self.name);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpAddress {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl IpAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            guid: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uri {
    pub uri: String,
}

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryKey {
    pub hive: String,
    pub key_path: String,
    /// Leaf key (or value) name
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl RegistryKey {
    pub fn new(
        hive: impl Into<String>,
        key_path: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            hive: hive.into(),
            key_path: key_path.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: Option<String>) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Alert {
    pub fn new(name: impl Into<String>, data: Option<String>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// An entity kind defined outside the built-in set.
///
/// `key_fields` names the properties that form its identity; missing ones
/// count as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomEntity {
    pub kind: String,
    pub key_fields: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Payload of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Process(Process),
    File(File),
    IpAddress(IpAddress),
    Domain(Domain),
    Uri(Uri),
    RegistryKey(RegistryKey),
    Alert(Alert),
    Custom(CustomEntity),
}

impl Entity {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Process(_) => NodeKind::Process,
            Self::File(_) => NodeKind::File,
            Self::IpAddress(_) => NodeKind::IpAddress,
            Self::Domain(_) => NodeKind::Domain,
            Self::Uri(_) => NodeKind::Uri,
            Self::RegistryKey(_) => NodeKind::RegistryKey,
            Self::Alert(_) => NodeKind::Alert,
            Self::Custom(c) => NodeKind::Custom(c.kind.clone()),
        }
    }

    /// Pure function of the defining fields
    pub fn identity(&self) -> IdentityKey {
        match self {
            Self::Process(p) => p.identity(),
            Self::File(f) => f.identity(),
            Self::IpAddress(ip) => match &ip.guid {
                Some(guid) => guid_key(NodeKind::IpAddress, guid),
                None => IdentityKey::new(NodeKind::IpAddress, vec![ip.address.clone()]),
            },
            Self::Domain(d) => IdentityKey::new(NodeKind::Domain, vec![d.name.clone()]),
            Self::Uri(u) => IdentityKey::new(NodeKind::Uri, vec![u.uri.clone()]),
            Self::RegistryKey(r) => match &r.guid {
                Some(guid) => guid_key(NodeKind::RegistryKey, guid),
                None => IdentityKey::new(
                    NodeKind::RegistryKey,
                    vec![r.hive.clone(), r.key_path.clone(), r.key.clone()],
                ),
            },
            Self::Alert(a) => IdentityKey::new(
                NodeKind::Alert,
                vec![a.name.clone(), a.data.clone().unwrap_or_default()],
            ),
            Self::Custom(c) => IdentityKey::new(
                NodeKind::Custom(c.kind.clone()),
                c.key_fields
                    .iter()
                    .map(|f| c.properties.get(f).map(PropertyValue::render).unwrap_or_default())
                    .collect(),
            ),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Process(p) => p.image.clone(),
            Self::File(f) => f.name.clone(),
            Self::IpAddress(ip) => ip.address.clone(),
            Self::Domain(d) => d.name.clone(),
            Self::Uri(u) => u.uri.clone(),
            Self::RegistryKey(r) => r.key.clone(),
            Self::Alert(a) => a.name.clone(),
            Self::Custom(c) => c.kind.clone(),
        }
    }

    /// Fold a second instance of the same vertex into this one
    pub(crate) fn absorb(&mut self, other: Entity) {
        match (self, other) {
            (Self::Process(a), Self::Process(b)) => a.absorb(b),
            (Self::File(a), Self::File(b)) => a.absorb(b),
            (Self::IpAddress(a), Self::IpAddress(b)) => fill(&mut a.address, b.address),
            (Self::RegistryKey(a), Self::RegistryKey(b)) => {
                fill(&mut a.hive, b.hive);
                fill(&mut a.key_path, b.key_path);
                fill(&mut a.key, b.key);
                fill_opt(&mut a.value, b.value);
                fill_opt(&mut a.value_type, b.value_type);
                fill_opt(&mut a.host, b.host);
            }
            (Self::Custom(a), Self::Custom(b)) => union(&mut a.properties, b.properties),
            // Domain, Uri and Alert carry nothing beyond their identity
            _ => {}
        }
    }

    pub fn as_process(&self) -> Option<&Process> {
        match self {
            Self::Process(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Self::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_registry_key(&self) -> Option<&RegistryKey> {
        match self {
            Self::RegistryKey(r) => Some(r),
            _ => None,
        }
    }
}

macro_rules! entity_from {
    ($($ty:ident),*) => {
        $(impl From<$ty> for Entity {
            fn from(value: $ty) -> Self {
                Entity::$ty(value)
            }
        })*
    };
}

entity_from!(Process, File, IpAddress, Domain, Uri, RegistryKey, Alert);

impl From<CustomEntity> for Entity {
    fn from(value: CustomEntity) -> Self {
        Entity::Custom(value)
    }
}
