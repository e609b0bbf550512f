//! Generic family: canonical, already-normalized events
//!
//! Every handler puts the acting process first, followed by the File node of
//! its on-disk image. An event without explicit actor fields falls back to
//! the run's root process.

use super::context::PipelineContext;
use super::dispatch::{AlertEnvelope, Family, HandlerTable, TransformerFamily};
use super::error::TransformError;
use super::event::EventRecord;
use super::paths::{split_path, split_reg_path};
use super::types::NodeTuple;
use crate::graph::{
    Alert, Attributes, Domain, File, IpAddress, Node, Process, RegistryKey, RelationKind, Uri,
};
use std::collections::HashSet;

pub mod fields {
    pub const PROCESS_IMAGE: &str = "process_image";
    pub const PROCESS_IMAGE_PATH: &str = "process_image_path";
    pub const PROCESS_ID: &str = "process_id";
    pub const COMMAND_LINE: &str = "command_line";
    pub const PARENT_PROCESS_IMAGE: &str = "parent_process_image";
    pub const PARENT_PROCESS_IMAGE_PATH: &str = "parent_process_image_path";
    pub const PARENT_PROCESS_ID: &str = "parent_process_id";
    pub const PARENT_COMMAND_LINE: &str = "parent_command_line";
    pub const HOST: &str = "host";
    pub const USER: &str = "user";
    pub const FILE_NAME: &str = "file_name";
    pub const FILE_PATH: &str = "file_path";
    pub const HASHES: &str = "hashes";
    pub const SRC_FILE: &str = "src_file";
    pub const DEST_FILE: &str = "dest_file";
    pub const IP_ADDRESS: &str = "ip_address";
    pub const RESOLVED_ADDRESSES: &str = "resolved_addresses";
    pub const PORT: &str = "port";
    pub const PROTOCOL: &str = "protocol";
    pub const HTTP_HOST: &str = "http_host";
    pub const HTTP_METHOD: &str = "http_method";
    pub const URI: &str = "uri";
    pub const HIVE: &str = "hive";
    pub const REG_KEY_PATH: &str = "reg_key_path";
    pub const REG_KEY: &str = "reg_key";
    pub const REG_KEY_VALUE: &str = "reg_key_value";
    pub const TIMESTAMP: &str = "timestamp";
    pub const ALERTED_ON: &str = "alerted_on";
    pub const ALERT_NAME: &str = "alert_name";
    pub const ALERT_DATA: &str = "alert_data";
}

pub mod kinds {
    pub const PROCESS_LAUNCHED: &str = "process_launched";
    pub const FILE_OPENED: &str = "file_opened";
    pub const FILE_WRITTEN: &str = "file_written";
    pub const FILE_DELETED: &str = "file_deleted";
    pub const LOADED_MODULE: &str = "loaded_module";
    pub const FILE_ATTRIBUTE_CHANGED: &str = "file_attribute_changed";
    pub const FILE_COPIED: &str = "file_copied";
    pub const CONNECTION: &str = "connection";
    pub const HTTP_REQUEST: &str = "http_request";
    pub const DNS_LOOKUP: &str = "dns_lookup";
    pub const REG_KEY_OPENED: &str = "reg_key_opened";
    pub const REG_KEY_DELETED: &str = "reg_key_deleted";
    pub const REG_KEY_SET: &str = "reg_key_set";
}

use fields::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFamily;

impl TransformerFamily for GenericFamily {
    fn family(&self) -> Family {
        Family::Generic
    }

    fn register_handlers(&self, table: &mut HandlerTable) {
        table
            .register(kinds::PROCESS_LAUNCHED, process_launched)
            .register(kinds::FILE_OPENED, file_opened)
            .register(kinds::FILE_WRITTEN, file_written)
            .register(kinds::FILE_DELETED, file_deleted)
            .register(kinds::LOADED_MODULE, loaded_module)
            .register(kinds::FILE_ATTRIBUTE_CHANGED, file_attribute_changed)
            .register(kinds::FILE_COPIED, file_copied)
            .register(kinds::CONNECTION, connection)
            .register(kinds::HTTP_REQUEST, http_request)
            .register(kinds::DNS_LOOKUP, dns_lookup)
            .register(kinds::REG_KEY_OPENED, reg_key_opened)
            .register(kinds::REG_KEY_DELETED, reg_key_deleted)
            .register(kinds::REG_KEY_SET, reg_key_set);
    }

    fn unwrap_alert(&self, record: &EventRecord) -> Result<Option<AlertEnvelope>, TransformError> {
        if !record.bool(ALERTED_ON) {
            return Ok(None);
        }
        let name = record.require_str(ALERT_NAME)?.to_string();
        let data = record.property(ALERT_DATA).map(|v| v.render());

        let mut inner = record.clone();
        for key in [ALERTED_ON, ALERT_NAME, ALERT_DATA] {
            inner.remove(key);
        }

        Ok(Some(AlertEnvelope {
            alert: Alert::new(name, data),
            attributes: record.timestamp_attrs(TIMESTAMP),
            inner,
        }))
    }
}

/// Build a process from `<prefix>process_image` style fields
fn process_from(
    record: &EventRecord,
    image: &str,
    image_path: &str,
    pid: &str,
    command_line: &str,
) -> Option<Process> {
    let image = record.str(image)?;
    let mut process = Process::new(image, record.string(image_path))
        .with_command_line(record.string(command_line));
    process.process_id = record.int(pid).and_then(|p| u32::try_from(p).ok());
    process.host = record.non_empty(HOST).map(str::to_string);
    Some(process)
}

/// The acting process, or the run's root process when the event names none
fn actor(record: &EventRecord, ctx: &PipelineContext) -> Result<Process, TransformError> {
    let explicit = process_from(record, PROCESS_IMAGE, PROCESS_IMAGE_PATH, PROCESS_ID, COMMAND_LINE)
        .map(|mut p| {
            p.user = record.non_empty(USER).map(str::to_string);
            p
        });
    explicit
        .or_else(|| ctx.root_process().cloned())
        .ok_or_else(|| TransformError::incomplete(record.kind_label(), PROCESS_IMAGE))
}

/// Anchor tuple: acting process followed by its image file
fn anchored(process: &Process) -> (Node, Node) {
    (Node::new(process.clone()), process.file_node())
}

/// A file from `file_path` + `file_name`; a lone `file_path` is split
fn file_from(record: &EventRecord, label: &str) -> Result<File, TransformError> {
    let file = match (record.str(FILE_PATH), record.str(FILE_NAME)) {
        (Some(path), Some(name)) => File::new(path, name),
        (Some(full), None) => {
            let parts = split_path(full);
            File::new(parts.dir, parts.name)
        }
        (None, Some(name)) => File::new("", name),
        (None, None) => return Err(TransformError::incomplete(label, FILE_PATH)),
    };
    Ok(file.with_hashes(record.string_map(HASHES)))
}

fn process_launched(
    record: &EventRecord,
    ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    let child = process_from(record, PROCESS_IMAGE, PROCESS_IMAGE_PATH, PROCESS_ID, COMMAND_LINE)
        .ok_or_else(|| TransformError::incomplete(record.kind_label(), PROCESS_IMAGE))?;
    let parent = process_from(
        record,
        PARENT_PROCESS_IMAGE,
        PARENT_PROCESS_IMAGE_PATH,
        PARENT_PROCESS_ID,
        PARENT_COMMAND_LINE,
    )
    .or_else(|| ctx.root_process().cloned())
    .ok_or_else(|| TransformError::incomplete(record.kind_label(), PARENT_PROCESS_IMAGE))?;

    let (mut parent, parent_file) = anchored(&parent);
    let (child, child_file) = anchored(&child);
    parent.add_relation(RelationKind::Launched, &child, record.timestamp_attrs(TIMESTAMP));

    Ok(NodeTuple::from(vec![parent, parent_file, child, child_file]))
}

fn file_activity(
    record: &EventRecord,
    ctx: &PipelineContext,
    kind: RelationKind,
) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let target = Node::new(file_from(record, record.kind_label())?);
    process.add_relation(kind, &target, record.timestamp_attrs(TIMESTAMP));
    Ok(NodeTuple::from(vec![process, proc_file, target]))
}

fn file_opened(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    file_activity(record, ctx, RelationKind::Accessed)
}

fn file_written(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    file_activity(record, ctx, RelationKind::Wrote)
}

fn file_deleted(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    file_activity(record, ctx, RelationKind::Deleted)
}

fn loaded_module(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    file_activity(record, ctx, RelationKind::Loaded)
}

fn file_attribute_changed(
    record: &EventRecord,
    ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    file_activity(record, ctx, RelationKind::Accessed)
}

fn file_copied(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let kind = record.kind_label();

    let src = record
        .object(SRC_FILE)
        .ok_or_else(|| TransformError::incomplete(kind, SRC_FILE))?;
    let dest = record
        .object(DEST_FILE)
        .ok_or_else(|| TransformError::incomplete(kind, DEST_FILE))?;

    let mut src = Node::new(file_from(&src, kind)?);
    let dest = Node::new(file_from(&dest, kind)?);

    let attrs = record.timestamp_attrs(TIMESTAMP);
    src.add_relation(RelationKind::CopiedTo, &dest, attrs.clone());
    process.add_relation(RelationKind::Copied, &src, attrs);

    Ok(NodeTuple::from(vec![process, proc_file, src, dest]))
}

fn connection(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let addr = Node::new(IpAddress::new(record.require_str(IP_ADDRESS)?));

    let mut attrs = record.timestamp_attrs(TIMESTAMP);
    if let Some(port) = record.int(PORT) {
        attrs.insert("port".into(), port.into());
    }
    record.copy_into(&mut attrs, PROTOCOL, "protocol");
    process.add_relation(RelationKind::ConnectedTo, &addr, attrs);

    Ok(NodeTuple::from(vec![process, proc_file, addr]))
}

fn http_request(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let mut domain = Node::new(Domain::new(record.require_str(HTTP_HOST)?));
    let mut uri = Node::new(Uri::new(record.require_str(URI)?));
    let timestamp = record.timestamp_attrs(TIMESTAMP);

    uri.link(RelationKind::UriOf, &domain);

    let mut request = timestamp.clone();
    record.copy_into(&mut request, HTTP_METHOD, "method");
    process.add_relation(RelationKind::HttpRequestTo, &uri, request);

    let ip = match record.str(IP_ADDRESS) {
        Some(address) => {
            let ip = Node::new(IpAddress::new(address));
            domain.add_relation(RelationKind::ResolvesTo, &ip, timestamp.clone());
            process.add_relation(RelationKind::ConnectedTo, &ip, timestamp);
            Some(ip)
        }
        None => None,
    };

    let mut tuple = NodeTuple::from(vec![process, proc_file, uri, domain]);
    if let Some(ip) = ip {
        tuple.push(ip);
    }
    Ok(tuple)
}

fn dns_lookup(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let mut domain = Node::new(Domain::new(record.require_str(HTTP_HOST)?));
    let timestamp = record.timestamp_attrs(TIMESTAMP);

    process.add_relation(RelationKind::DnsQueryFor, &domain, timestamp.clone());

    // Zero resolved addresses is a valid outcome
    let mut addresses = record.strings(IP_ADDRESS);
    addresses.extend(record.strings(RESOLVED_ADDRESSES));
    let mut seen = HashSet::new();
    addresses.retain(|address| seen.insert(address.clone()));

    let resolved: Vec<Node> = addresses
        .into_iter()
        .map(|address| {
            let ip = Node::new(IpAddress::new(address));
            domain.add_relation(RelationKind::ResolvesTo, &ip, timestamp.clone());
            ip
        })
        .collect();

    let mut tuple = NodeTuple::from(vec![process, proc_file, domain]);
    for ip in resolved {
        tuple.push(ip);
    }
    Ok(tuple)
}

/// Registry key from `hive`/`reg_key_path`/`reg_key`, or a full `reg_key_path` alone
fn registry_key(record: &EventRecord) -> Result<RegistryKey, TransformError> {
    match record.str(HIVE) {
        Some(hive) => Ok(RegistryKey::new(
            hive,
            record.string(REG_KEY_PATH),
            record.string(REG_KEY),
        )),
        None => {
            let full = record.require_str(REG_KEY_PATH)?;
            let parts = split_reg_path(full);
            Ok(RegistryKey::new(parts.hive, parts.key_path, parts.key))
        }
    }
}

fn registry_activity(
    record: &EventRecord,
    ctx: &PipelineContext,
    kind: RelationKind,
) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let key = Node::new(registry_key(record)?);
    process.add_relation(kind, &key, record.timestamp_attrs(TIMESTAMP));
    Ok(NodeTuple::from(vec![process, proc_file, key]))
}

fn reg_key_opened(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    registry_activity(record, ctx, RelationKind::ReadKey)
}

fn reg_key_deleted(
    record: &EventRecord,
    ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    registry_activity(record, ctx, RelationKind::DeletedKey)
}

fn reg_key_set(record: &EventRecord, ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let (mut process, proc_file) = anchored(&actor(record, ctx)?);
    let value = record.property(REG_KEY_VALUE).map(|v| v.render());
    let key = Node::new(registry_key(record)?.with_value(value.clone()));

    let mut attrs: Attributes = record.timestamp_attrs(TIMESTAMP);
    if let Some(value) = value {
        attrs.insert("value".into(), value.into());
    }
    process.add_relation(RelationKind::ChangedValue, &key, attrs);

    Ok(NodeTuple::from(vec![process, proc_file, key]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, PropertyValue};
    use crate::transform::Dispatcher;
    use serde_json::json;

    fn run(value: serde_json::Value) -> NodeTuple {
        run_with(value, &mut PipelineContext::new())
    }

    fn run_with(value: serde_json::Value, ctx: &mut PipelineContext) -> NodeTuple {
        let record = EventRecord::try_from(value).unwrap();
        Dispatcher::for_family(Family::Generic)
            .try_dispatch(&record, ctx)
            .unwrap()
    }

    fn actor_fields() -> serde_json::Value {
        json!({
            "process_image": "<PATH_SAMPLE.EXE>",
            "process_image_path": "\\",
            "process_id": "3420",
            "command_line": "",
        })
    }

    fn event(kind: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut value = actor_fields();
        let map = value.as_object_mut().unwrap();
        map.insert("event_type".into(), kind.into());
        for (k, v) in extra.as_object().unwrap() {
            map.insert(k.clone(), v.clone());
        }
        value
    }

    fn ts(value: i64) -> Attributes {
        [("timestamp".to_string(), PropertyValue::Int(value))].into()
    }

    #[test]
    fn launch_without_timestamp_records_empty_occurrence() {
        let tuple = run(json!({
            "event_type": "process_launched",
            "parent_process_image": "<PATH_SAMPLE.EXE>",
            "parent_process_image_path": "\\",
            "parent_process_id": "3420",
            "parent_command_line": "",
            "process_image": "cmd.exe",
            "process_image_path": "<SYSTEM32>",
            "process_id": "3712",
            "command_line": "",
        }));
        assert_eq!(tuple.len(), 4);
        let parent = tuple.get(0).unwrap();
        let child = tuple.get(2).unwrap();
        assert_eq!(
            parent.occurrences(RelationKind::Launched, &child.id()).unwrap(),
            &[Attributes::new()]
        );
        let parent_file = tuple.get(1).unwrap();
        assert!(parent_file.occurrences(RelationKind::FileOf, &parent.id()).is_some());
        assert_eq!(
            parent.entity().as_process().unwrap().process_path(),
            "\\<PATH_SAMPLE.EXE>"
        );
    }

    #[test]
    fn file_event_kinds_map_to_relations() {
        for (kind, relation) in [
            ("file_opened", RelationKind::Accessed),
            ("file_written", RelationKind::Wrote),
            ("file_deleted", RelationKind::Deleted),
            ("loaded_module", RelationKind::Loaded),
            ("file_attribute_changed", RelationKind::Accessed),
        ] {
            let tuple = run(event(
                kind,
                json!({"file_path": "C:\\tmp", "file_name": "a.dll", "hashes": {"md5": "ab"}}),
            ));
            let process = tuple.anchor().unwrap();
            let target = tuple.get(2).unwrap();
            assert!(process.occurrences(relation, &target.id()).is_some(), "{}", kind);
            assert_eq!(target.entity().as_file().unwrap().hashes["md5"], "ab");
        }
    }

    #[test]
    fn copy_links_source_to_destination() {
        let tuple = run(event(
            "file_copied",
            json!({
                "src_file": {"file_path": "C:\\a", "file_name": "x.exe"},
                "dest_file": {"file_path": "C:\\b", "file_name": "y.exe"},
            }),
        ));
        assert_eq!(tuple.len(), 4);
        let process = tuple.anchor().unwrap();
        let src = tuple.get(2).unwrap();
        let dest = tuple.get(3).unwrap();
        assert!(process.occurrences(RelationKind::Copied, &src.id()).is_some());
        assert!(src.occurrences(RelationKind::CopiedTo, &dest.id()).is_some());
    }

    #[test]
    fn copy_without_destination_is_incomplete() {
        let record = EventRecord::try_from(event(
            "file_copied",
            json!({"src_file": {"file_path": "C:\\a", "file_name": "x.exe"}}),
        ))
        .unwrap();
        let err = Dispatcher::for_family(Family::Generic)
            .try_dispatch(&record, &mut PipelineContext::new())
            .unwrap_err();
        assert_eq!(err, TransformError::incomplete("file_copied", DEST_FILE));
    }

    #[test]
    fn connection_carries_port_and_protocol() {
        let tuple = run(event(
            "connection",
            json!({"ip_address": "10.0.0.2", "port": "443", "protocol": "tcp", "timestamp": 7}),
        ));
        let process = tuple.anchor().unwrap();
        let ip = tuple.get(2).unwrap();
        let occ = &process.occurrences(RelationKind::ConnectedTo, &ip.id()).unwrap()[0];
        assert_eq!(occ["port"], PropertyValue::Int(443));
        assert_eq!(occ["protocol"], PropertyValue::from("tcp"));
        assert_eq!(occ["timestamp"], PropertyValue::Int(7));
    }

    #[test]
    fn http_request_without_ip_has_four_nodes() {
        let tuple = run(event(
            "http_request",
            json!({"http_host": "example.com", "uri": "/index", "http_method": "GET"}),
        ));
        assert_eq!(tuple.len(), 4);
        let process = tuple.anchor().unwrap();
        let uri = tuple.get(2).unwrap();
        let domain = tuple.get(3).unwrap();
        assert_eq!(
            process.occurrences(RelationKind::HttpRequestTo, &uri.id()).unwrap()[0]["method"],
            PropertyValue::from("GET")
        );
        assert!(uri.occurrences(RelationKind::UriOf, &domain.id()).is_some());
    }

    #[test]
    fn dns_lookup_accepts_address_lists() {
        let tuple = run(event(
            "dns_lookup",
            json!({"http_host": "multi.test", "resolved_addresses": ["1.1.1.1", "2.2.2.2"]}),
        ));
        assert_eq!(tuple.len(), 5);
        let domain = tuple.get(2).unwrap();
        assert_eq!(domain.relations_of_kind(RelationKind::ResolvesTo).count(), 2);
    }

    #[test]
    fn dns_lookup_records_each_address_once() {
        let tuple = run(event(
            "dns_lookup",
            json!({
                "http_host": "multi.test",
                "ip_address": "1.1.1.1",
                "resolved_addresses": ["2.2.2.2", "1.1.1.1"],
            }),
        ));
        assert_eq!(tuple.len(), 5);
        let domain = tuple.get(2).unwrap();
        let ip = Node::new(IpAddress::new("1.1.1.1"));
        assert_eq!(
            domain.occurrences(RelationKind::ResolvesTo, &ip.id()).unwrap().len(),
            1
        );
        assert_eq!(tuple.get(3).unwrap().id(), ip.id());
    }

    #[test]
    fn registry_key_from_full_path() {
        let tuple = run(event(
            "reg_key_opened",
            json!({"reg_key_path": "HKLM\\Software\\Vendor\\Run"}),
        ));
        let key = tuple.get(2).unwrap().entity().as_registry_key().unwrap().clone();
        assert_eq!(key.hive, "HKLM");
        assert_eq!(key.key_path, "Software\\Vendor");
        assert_eq!(key.key, "Run");
        assert!(tuple
            .anchor()
            .unwrap()
            .occurrences(RelationKind::ReadKey, &tuple.get(2).unwrap().id())
            .is_some());
    }

    #[test]
    fn reg_key_deleted_maps_to_deleted_key() {
        let tuple = run(event(
            "reg_key_deleted",
            json!({"hive": "HKCU", "reg_key_path": "Software", "reg_key": "Temp", "timestamp": 3}),
        ));
        let process = tuple.anchor().unwrap();
        let key = tuple.get(2).unwrap();
        assert_eq!(
            process.occurrences(RelationKind::DeletedKey, &key.id()).unwrap(),
            &[ts(3)]
        );
    }

    #[test]
    fn missing_actor_falls_back_to_root_process() {
        let root = Process::new("sample.exe", "C:\\Users\\me");
        let mut ctx = PipelineContext::new().with_root_process(root.clone());
        let tuple = run_with(
            json!({"event_type": "file_opened", "file_path": "C:\\x.txt"}),
            &mut ctx,
        );
        assert_eq!(tuple.anchor().unwrap().id(), Node::new(root).id());
    }

    #[test]
    fn missing_actor_without_root_is_incomplete() {
        let record =
            EventRecord::try_from(json!({"event_type": "file_opened", "file_path": "C:\\x"}))
                .unwrap();
        let err = Dispatcher::for_family(Family::Generic)
            .try_dispatch(&record, &mut PipelineContext::new())
            .unwrap_err();
        assert_eq!(err, TransformError::incomplete("file_opened", PROCESS_IMAGE));
    }

    #[test]
    fn alert_wraps_every_node() {
        let tuple = run(event(
            "connection",
            json!({
                "ip_address": "6.6.6.6",
                "alerted_on": true,
                "alert_name": "Known C2",
                "alert_data": "feed:abc",
                "timestamp": 11,
            }),
        ));
        assert_eq!(tuple.len(), 4);
        let alert = tuple.anchor().unwrap();
        assert_eq!(alert.kind(), NodeKind::Alert);
        for node in tuple.iter().skip(1) {
            assert_eq!(
                alert.occurrences(RelationKind::AlertedOn, &node.id()).unwrap(),
                &[ts(11)]
            );
        }
    }

    #[test]
    fn alert_on_unusable_event_stands_alone() {
        let tuple = run(json!({
            "event_type": "teleported",
            "alerted_on": true,
            "alert_name": "Odd",
        }));
        assert_eq!(tuple.len(), 1);
        assert_eq!(tuple.anchor().unwrap().kind(), NodeKind::Alert);
    }
}
