//! Provenance family: CDM-style system provenance logs
//!
//! Every record carries a UUID and references other records by UUID, so every
//! node built here uses the UUID as its identity. Events that reference an
//! object before its description arrives produce a placeholder node that is
//! filled in when the two merge.

use super::context::PipelineContext;
use super::dispatch::{Family, HandlerTable, TransformerFamily};
use super::error::TransformError;
use super::event::EventRecord;
use super::paths::{split_path, split_reg_path};
use super::types::NodeTuple;
use crate::graph::{File, IpAddress, Node, Process, RegistryKey, RelationKind};

/// Key wrapping UUID references in CDM records
pub const CDM_UUID: &str = "com.bbn.tc.schema.avro.cdm18.UUID";
const CDM_VALUE: &str = "com.bbn.tc.schema.avro.cdm18.Value";
const REGISTRY_PREFIX: &str = "\\REGISTRY\\";

pub mod kinds {
    pub const SUBJECT: &str = "subject";
    pub const FILE_OBJECT: &str = "fileobject";
    pub const REGISTRY_KEY_OBJECT: &str = "registrykeyobject";
    pub const NETFLOW_OBJECT: &str = "netflowobject";
    pub const EVENT: &str = "event";
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceFamily;

impl TransformerFamily for ProvenanceFamily {
    fn family(&self) -> Family {
        Family::Provenance
    }

    fn register_handlers(&self, table: &mut HandlerTable) {
        table
            .register(kinds::SUBJECT, subject)
            .register(kinds::FILE_OBJECT, file_object)
            .register(kinds::REGISTRY_KEY_OBJECT, registry_key_object)
            .register(kinds::NETFLOW_OBJECT, netflow_object)
            .register(kinds::EVENT, event);
    }
}

fn uuid_ref<'a>(record: &'a EventRecord, key: &str) -> Result<&'a str, TransformError> {
    record
        .path_str(&[key, CDM_UUID])
        .ok_or_else(|| TransformError::incomplete(record.kind_label(), format!("{}.UUID", key)))
}

fn to_backslashes(path: &str) -> String {
    path.replace('/', "\\")
}

fn subject(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    if record.str("type") != Some("SUBJECT_PROCESS") {
        return Ok(NodeTuple::new());
    }

    let uuid = record.require_str("uuid")?;
    let host = record.non_empty("hostId").map(str::to_string);
    let command_line = record.path_str(&["cmdLine", "string"]).map(str::to_string);
    let image = record
        .path_str(&["properties", "map", "path"])
        .filter(|p| !p.is_empty())
        .map(|p| split_path(&to_backslashes(p)));

    // Without a path, the command line is the best name available
    let (name, dir) = match image {
        Some(parts) => (parts.name, parts.dir),
        None => {
            let fallback = command_line.clone().unwrap_or_default();
            (fallback.clone(), fallback)
        }
    };

    let process = Process {
        image: name,
        image_path: dir,
        command_line: command_line.unwrap_or_default(),
        host: host.clone(),
        ..Process::with_guid(uuid)
    };
    let process = Node::new(process);

    let Ok(parent_uuid) = uuid_ref(record, "parentSubject") else {
        return Ok(NodeTuple::new().with(process));
    };
    let mut parent = Node::new(Process {
        host,
        ..Process::with_guid(parent_uuid)
    });
    parent.add_relation(
        RelationKind::Launched,
        &process,
        record.timestamp_attrs("startTimestampNanos"),
    );

    Ok(NodeTuple::from(vec![parent, process]))
}

fn file_object(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    if !matches!(
        record.str("type"),
        Some("FILE_OBJECT_BLOCK") | Some("FILE_OBJECT_PEFILE")
    ) {
        return Ok(NodeTuple::new());
    }

    let mut file = File::with_guid(record.require_str("uuid")?);
    file.host = record
        .path_str(&["baseObject", "hostId"])
        .map(str::to_string);

    // Not every object has a full path; take what is there
    if let Some(full) = record
        .path_str(&["baseObject", "properties", "map", "filename"])
        .filter(|p| !p.is_empty())
    {
        let parts = split_path(&to_backslashes(full));
        file = File {
            guid: file.guid,
            host: file.host,
            ..File::new(parts.dir, parts.name)
        };
    }

    Ok(NodeTuple::new().with(Node::new(file)))
}

fn registry_key_object(
    record: &EventRecord,
    _ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    let uuid = record.require_str("uuid")?;
    let raw = record.require_str("key")?;
    let parts = split_reg_path(raw.strip_prefix(REGISTRY_PREFIX).unwrap_or(raw));

    let value = record
        .object("value")
        .and_then(|value| value.object(CDM_VALUE));

    let key = RegistryKey {
        hive: parts.hive,
        key_path: parts.key_path,
        key: parts.key,
        value: value
            .as_ref()
            .and_then(|v| v.path_str(&["name", "string"]))
            .map(str::to_string),
        value_type: value
            .as_ref()
            .and_then(|v| v.non_empty("valueDataType"))
            .map(str::to_string),
        host: record
            .path_str(&["baseObject", "hostId"])
            .map(str::to_string),
        guid: Some(uuid.to_string()),
    };

    Ok(NodeTuple::new().with(Node::new(key)))
}

fn netflow_object(
    record: &EventRecord,
    _ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    let address = IpAddress {
        address: record.string("remoteAddress"),
        guid: Some(record.require_str("uuid")?.to_string()),
    };
    Ok(NodeTuple::new().with(Node::new(address)))
}

fn event(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let event_type = record.require_str("type")?;
    let mut actor = Node::new(Process::with_guid(uuid_ref(record, "subject")?));
    let target_uuid = uuid_ref(record, "predicateObject")?;
    let timestamp = record.timestamp_attrs("timestampNanos");

    let file_relation = match event_type {
        "EVENT_READ" | "EVENT_OPEN" | "EVENT_MODIFY_FILE_ATTRIBUTES" => Some(RelationKind::Accessed),
        "EVENT_WRITE" | "EVENT_WRITE_APPEND" | "EVENT_CREATE_OBJECT" => Some(RelationKind::Wrote),
        "EVENT_LOAD_LIBRARY" => Some(RelationKind::Loaded),
        _ => None,
    };

    let target = match (file_relation, event_type) {
        (Some(kind), _) => {
            let file = Node::new(File::with_guid(target_uuid));
            actor.add_relation(kind, &file, timestamp);
            file
        }
        (None, "EVENT_EXECUTE") => {
            let image = record
                .path_str(&["predicateObjectPath", "string"])
                .unwrap_or_default();
            let launched = Node::new(Process {
                image: image.to_string(),
                ..Process::with_guid(target_uuid)
            });
            actor.add_relation(RelationKind::Launched, &launched, timestamp);
            launched
        }
        (None, "EVENT_CONNECT") => {
            let address = Node::new(IpAddress {
                address: String::new(),
                guid: Some(target_uuid.to_string()),
            });
            actor.add_relation(RelationKind::ConnectedTo, &address, timestamp);
            address
        }
        (None, other) => {
            return Err(TransformError::UnknownEventKind(format!("event/{}", other)));
        }
    };

    Ok(NodeTuple::from(vec![actor, target]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};
    use crate::transform::Dispatcher;
    use serde_json::json;

    fn dispatch(value: serde_json::Value) -> Result<NodeTuple, TransformError> {
        let record = EventRecord::try_from(value).unwrap();
        Dispatcher::for_family(Family::Provenance)
            .try_dispatch(&record, &mut PipelineContext::new())
    }

    #[test]
    fn subject_with_parent_puts_parent_first() {
        let tuple = dispatch(json!({
            "event_type": "subject",
            "uuid": "B80F3806-0000-0000-0000-000000000020",
            "type": "SUBJECT_PROCESS",
            "parentSubject": {CDM_UUID: "52071700-0000-0000-0000-000000000020"},
            "hostId": "0A00063C-5254-00F0-0D60-000000000070",
            "cmdLine": {"string": "/usr/bin/firefox"},
            "properties": {"map": {"path": "/home/admin/Downloads/firefox/firefox"}},
        }))
        .unwrap();

        assert_eq!(tuple.len(), 2);
        let parent = tuple.get(0).unwrap();
        let proc = tuple.get(1).unwrap();
        let p = proc.entity().as_process().unwrap();
        assert_eq!(p.guid.as_deref(), Some("B80F3806-0000-0000-0000-000000000020"));
        assert_eq!(p.image, "firefox");
        assert_eq!(p.command_line, "/usr/bin/firefox");
        assert!(parent.occurrences(RelationKind::Launched, &proc.id()).is_some());
    }

    #[test]
    fn non_process_subjects_are_filtered() {
        let tuple = dispatch(json!({"event_type": "subject", "uuid": "x", "type": "SUBJECT_THREAD"}))
            .unwrap();
        assert!(tuple.is_empty());
    }

    #[test]
    fn registry_object_strips_registry_prefix() {
        let tuple = dispatch(json!({
            "event_type": "registrykeyobject",
            "uuid": "736F96AB-F043-4ED4-A456-D6F6DC3365FC",
            "baseObject": {"hostId": "47923ED7"},
            "key": "\\REGISTRY\\USER\\S-1-5-21\\Software\\Microsoft\\Subscriptions\\280810",
            "value": {CDM_VALUE: {
                "valueDataType": "VALUE_DATA_TYPE_LONG",
                "name": {"string": "AccelerateCacheRefreshLastDetected"},
            }},
        }))
        .unwrap();
        assert_eq!(tuple.len(), 1);
        let key = tuple.anchor().unwrap().entity().as_registry_key().unwrap().clone();
        assert_eq!(key.hive, "USER");
        assert_eq!(key.key, "280810");
        assert_eq!(key.value.as_deref(), Some("AccelerateCacheRefreshLastDetected"));
        assert_eq!(key.value_type.as_deref(), Some("VALUE_DATA_TYPE_LONG"));
    }

    #[test]
    fn event_kinds_map_to_relations() {
        for (event_type, relation, kind) in [
            ("EVENT_READ", RelationKind::Accessed, NodeKind::File),
            ("EVENT_WRITE_APPEND", RelationKind::Wrote, NodeKind::File),
            ("EVENT_LOAD_LIBRARY", RelationKind::Loaded, NodeKind::File),
            ("EVENT_EXECUTE", RelationKind::Launched, NodeKind::Process),
            ("EVENT_CONNECT", RelationKind::ConnectedTo, NodeKind::IpAddress),
        ] {
            let tuple = dispatch(json!({
                "event_type": "event",
                "type": event_type,
                "subject": {CDM_UUID: "S-1"},
                "predicateObject": {CDM_UUID: "O-1"},
                "timestampNanos": 1_522_943_310_819_901_200_i64,
            }))
            .unwrap();
            let actor = tuple.anchor().unwrap();
            let target = tuple.get(1).unwrap();
            assert_eq!(target.kind(), kind, "{}", event_type);
            assert_eq!(actor.occurrences(relation, &target.id()).unwrap().len(), 1);
        }
    }

    #[test]
    fn unsupported_event_type_is_unknown() {
        let err = dispatch(json!({
            "event_type": "event",
            "type": "EVENT_FORK",
            "subject": {CDM_UUID: "S-1"},
            "predicateObject": {CDM_UUID: "O-1"},
        }))
        .unwrap_err();
        assert!(err.is_unknown());
    }

    #[test]
    fn placeholder_merges_with_described_object() {
        let write = dispatch(json!({
            "event_type": "event",
            "type": "EVENT_WRITE",
            "subject": {CDM_UUID: "S-1"},
            "predicateObject": {CDM_UUID: "F-1"},
        }))
        .unwrap();
        let described = dispatch(json!({
            "event_type": "fileobject",
            "uuid": "F-1",
            "type": "FILE_OBJECT_BLOCK",
            "baseObject": {"hostId": "H", "properties": {"map": {"filename": "/tmp/drop.sh"}}},
        }))
        .unwrap();

        let mut graph = Graph::new();
        graph.extend(write);
        graph.extend(described);
        assert_eq!(graph.node_count(), 2);

        let file = graph
            .nodes()
            .find(|n| n.kind() == NodeKind::File)
            .unwrap()
            .entity()
            .as_file()
            .unwrap();
        assert_eq!(file.name, "drop.sh");
        assert_eq!(file.path, "\\tmp");
        assert_eq!(file.extension.as_deref(), Some("sh"));
    }
}
