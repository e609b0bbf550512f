//! EDR family: endpoint triage exports
//!
//! Records use the agent's camelCase field names. Apart from process events,
//! `processPath` is the directory of the image and `process` its file name.

use super::context::PipelineContext;
use super::dispatch::{AlertEnvelope, Family, HandlerTable, TransformerFamily};
use super::error::TransformError;
use super::event::{EventRecord, KIND_FIELD};
use super::paths::split_path;
use super::types::NodeTuple;
use crate::graph::{
    Alert, Domain, File, Hashes, IpAddress, Node, Process, RegistryKey, RelationKind,
    Uri,
};
use tracing::{debug, warn};

pub mod kinds {
    pub const PROCESS: &str = "processEvent";
    pub const FILE_WRITE: &str = "fileWriteEvent";
    pub const URL_MONITOR: &str = "urlMonitorEvent";
    pub const IPV4_NETWORK: &str = "ipv4NetworkEvent";
    pub const DNS_LOOKUP: &str = "dnsLookupEvent";
    pub const IMAGE_LOAD: &str = "imageLoadEvent";
    pub const REG_KEY: &str = "regKeyEvent";
    pub const ALERT: &str = "alertEvent";
}

const EVENT_TIME: &str = "event_time";
const PROCESS_PATH: &str = "processPath";

#[derive(Debug, Clone, Copy, Default)]
pub struct EdrFamily;

impl TransformerFamily for EdrFamily {
    fn family(&self) -> Family {
        Family::Edr
    }

    fn register_handlers(&self, table: &mut HandlerTable) {
        table
            .register(kinds::PROCESS, process_event)
            .register(kinds::FILE_WRITE, file_write)
            .register(kinds::URL_MONITOR, url_monitor)
            .register(kinds::IPV4_NETWORK, network)
            .register(kinds::DNS_LOOKUP, dns_lookup)
            .register(kinds::IMAGE_LOAD, image_load)
            .register(kinds::REG_KEY, registry);
    }

    /// A present but empty or null `processPath` leaves nothing to anchor on
    fn accepts(&self, record: &EventRecord) -> bool {
        match record.fields().find(|(key, _)| key.as_str() == PROCESS_PATH) {
            Some((_, value)) => !(value.is_null() || value.as_str() == Some("")),
            None => true,
        }
    }

    fn unwrap_alert(&self, record: &EventRecord) -> Result<Option<AlertEnvelope>, TransformError> {
        if record.kind() != Some(kinds::ALERT) {
            return Ok(None);
        }

        let name = record
            .path_str(&["_threat_data", "display_name"])
            .or_else(|| record.path_str(&["_threat_data", "uri_name"]))
            .or_else(|| record.non_empty("match_hash"))
            .ok_or_else(|| TransformError::incomplete(kinds::ALERT, "match_hash"))?
            .to_string();

        let inner_kind = record
            .path_str(&["data", "key", KIND_FIELD])
            .ok_or_else(|| TransformError::incomplete(kinds::ALERT, "data.key.event_type"))?
            .to_string();
        let mut inner = record
            .object("data")
            .and_then(|data| data.object("values"))
            .ok_or_else(|| TransformError::incomplete(kinds::ALERT, "data.values"))?;
        inner.set(KIND_FIELD, inner_kind);
        if !inner.contains(EVENT_TIME) {
            if let Some(time) = record.get(EVENT_TIME) {
                inner.set(EVENT_TIME, time.clone());
            }
        }

        Ok(Some(AlertEnvelope {
            alert: Alert::new(name, None),
            attributes: record.timestamp_attrs(EVENT_TIME),
            inner,
        }))
    }
}

fn md5(record: &EventRecord) -> Hashes {
    record
        .non_empty("md5")
        .map(|digest| [("md5".to_string(), digest.to_string())].into())
        .unwrap_or_default()
}

/// An unparsable or out-of-range pid leaves the process without one
fn pid(record: &EventRecord, key: &str) -> Option<u32> {
    let raw = record.get(key)?;
    let parsed = record.int(key).and_then(|p| u32::try_from(p).ok());
    if parsed.is_none() {
        debug!(field = key, raw = %raw, "dropping malformed pid");
    }
    parsed
}

/// Acting process for non-process events: image and directory come separately
fn actor(record: &EventRecord) -> Result<Process, TransformError> {
    let mut process = Process::new(record.require_str("process")?, record.require_str(PROCESS_PATH)?)
        .with_command_line(record.string("processCmdLine"));
    process.process_id = pid(record, "pid");
    process.user = record.non_empty("username").map(str::to_string);
    Ok(process)
}

fn anchored(process: &Process) -> (Node, Node) {
    (Node::new(process.clone()), process.file_node())
}

/// `drive` + `filePath` + `fileName`
fn file_from(record: &EventRecord) -> Result<File, TransformError> {
    let dir = record.require_str("filePath")?;
    let dir = match record.non_empty("drive") {
        Some(drive) => format!("{}:\\{}", drive, dir),
        None => dir.to_string(),
    };
    Ok(File::new(dir, record.require_str("fileName")?))
}

fn process_event(
    record: &EventRecord,
    _ctx: &mut PipelineContext,
) -> Result<NodeTuple, TransformError> {
    if !matches!(record.str("eventType"), Some("start") | Some("running")) {
        return Ok(NodeTuple::new());
    }

    let full_path = record.require_str(PROCESS_PATH)?;
    // A running process sometimes reports its bare image as the path
    if Some(full_path) == record.str("process") {
        return Ok(NodeTuple::new());
    }

    let image = split_path(full_path);
    let mut child =
        Process::new(image.name, image.dir).with_command_line(record.string("processCmdLine"));
    child.process_id = pid(record, "pid");
    child.hashes = md5(record);
    child.user = record.non_empty("username").map(str::to_string);
    let (child, child_file) = anchored(&child);

    let Some(parent_path) = record.str("parentProcessPath") else {
        return Ok(NodeTuple::from(vec![child, child_file]));
    };

    let parent_image = split_path(parent_path);
    let mut parent = Process::new(parent_image.name, parent_image.dir);
    parent.process_id = pid(record, "parentPid");
    let (mut parent, parent_file) = anchored(&parent);
    parent.add_relation(RelationKind::Launched, &child, record.timestamp_attrs(EVENT_TIME));

    Ok(NodeTuple::from(vec![parent, parent_file, child, child_file]))
}

fn file_write(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let target = Node::new(file_from(record)?.with_hashes(md5(record)));
    let (mut process, proc_file) = anchored(&actor(record)?);

    let mut attrs = record.timestamp_attrs(EVENT_TIME);
    record.copy_into(&mut attrs, "textAtLowestOffset", "contents");
    process.add_relation(RelationKind::Wrote, &target, attrs);

    Ok(NodeTuple::from(vec![process, proc_file, target]))
}

fn url_monitor(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let mut uri = Node::new(Uri::new(record.require_str("requestUrl")?));
    let mut domain = Node::new(Domain::new(record.require_str("hostname")?));
    let ip = Node::new(IpAddress::new(record.require_str("remoteIpAddress")?));
    let (mut process, proc_file) = anchored(&actor(record)?);
    let timestamp = record.timestamp_attrs(EVENT_TIME);

    uri.add_relation(RelationKind::UriOf, &domain, timestamp.clone());

    let mut request = timestamp.clone();
    record.copy_into(&mut request, "urlMethod", "method");
    record.copy_into(&mut request, "userAgent", "user_agent");
    record.copy_into(&mut request, "httpHeader", "header");
    process.add_relation(RelationKind::HttpRequestTo, &uri, request);

    let mut connection = timestamp.clone();
    if let Some(port) = record.int("remotePort") {
        connection.insert("port".into(), port.into());
    }
    connection.insert("protocol".into(), "HTTP".into());
    process.add_relation(RelationKind::ConnectedTo, &ip, connection);

    domain.add_relation(RelationKind::ResolvesTo, &ip, timestamp);

    Ok(NodeTuple::from(vec![process, proc_file, uri, domain, ip]))
}

fn network(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let ip = Node::new(IpAddress::new(record.require_str("remoteIP")?));
    let (mut process, proc_file) = anchored(&actor(record)?);

    let mut attrs = record.timestamp_attrs(EVENT_TIME);
    record.copy_into(&mut attrs, "protocol", "protocol");
    if let Some(port) = record.int("remotePort") {
        attrs.insert("port".into(), port.into());
    }
    process.add_relation(RelationKind::ConnectedTo, &ip, attrs);

    Ok(NodeTuple::from(vec![process, proc_file, ip]))
}

fn dns_lookup(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let domain = Node::new(Domain::new(record.require_str("hostname")?));
    let (mut process, proc_file) = anchored(&actor(record)?);
    process.add_relation(RelationKind::DnsQueryFor, &domain, record.timestamp_attrs(EVENT_TIME));
    Ok(NodeTuple::from(vec![process, proc_file, domain]))
}

fn image_load(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let loaded = Node::new(file_from(record)?);
    let (mut process, proc_file) = anchored(&actor(record)?);
    process.add_relation(RelationKind::Loaded, &loaded, record.timestamp_attrs(EVENT_TIME));
    Ok(NodeTuple::from(vec![process, proc_file, loaded]))
}

/// Registry event types: 1 value changed, 2 value deleted, 3 key created, 4 key deleted
fn registry_relation(event_type: Option<i64>) -> Option<RelationKind> {
    match event_type? {
        1 => Some(RelationKind::ChangedValue),
        2 => Some(RelationKind::DeletedValue),
        3 => Some(RelationKind::CreatedKey),
        4 => Some(RelationKind::DeletedKey),
        _ => None,
    }
}

fn registry(record: &EventRecord, _ctx: &mut PipelineContext) -> Result<NodeTuple, TransformError> {
    let mut key = RegistryKey::new(
        record.require_str("hive")?,
        record.string("keyPath"),
        record.string("valueName"),
    );
    key.value = record.str("text").map(str::to_string);
    key.value_type = record.non_empty("valueType").map(str::to_string);
    let key = Node::new(key);
    let (mut process, proc_file) = anchored(&actor(record)?);

    match registry_relation(record.int("eventType")) {
        Some(kind) => process.add_relation(kind, &key, record.timestamp_attrs(EVENT_TIME)),
        None => warn!(
            event_type = ?record.get("eventType"),
            "unrecognized registry event type, key kept without relation"
        ),
    }

    Ok(NodeTuple::from(vec![process, proc_file, key]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, NodeKind, PropertyValue};
    use crate::transform::Dispatcher;
    use serde_json::json;

    fn dispatch(value: serde_json::Value) -> Result<NodeTuple, TransformError> {
        let record = EventRecord::try_from(value).unwrap();
        Dispatcher::for_family(Family::Edr).try_dispatch(&record, &mut PipelineContext::new())
    }

    fn ts(value: i64) -> Attributes {
        [("timestamp".to_string(), PropertyValue::Int(value))].into()
    }

    fn process_event() -> serde_json::Value {
        json!({
            "eventType": "start",
            "pid": "4024",
            "processPath": "C:\\Windows\\System32\\find.exe",
            "process": "find.exe",
            "parentPid": "6036",
            "parentProcessPath": "C:\\Windows\\System32\\cmd.exe",
            "parentProcess": "cmd.exe",
            "username": "NT AUTHORITY\\SYSTEM",
            "md5": "84f50f355a74df0fb58b8d6edd2bc197",
            "processCmdLine": "find  /i \"Listening\"   ",
            "event_type": "processEvent",
            "event_time": 1_527_199_230,
        })
    }

    #[test]
    fn process_start_with_parent() {
        let tuple = dispatch(process_event()).unwrap();
        assert_eq!(tuple.len(), 4);

        let parent = tuple.get(0).unwrap();
        let parent_file = tuple.get(1).unwrap();
        let child = tuple.get(2).unwrap();
        let child_file = tuple.get(3).unwrap();

        assert_eq!(
            parent.occurrences(RelationKind::Launched, &child.id()).unwrap(),
            &[ts(1_527_199_230)]
        );
        let p = parent.entity().as_process().unwrap();
        assert_eq!(p.process_id, Some(6036));
        assert_eq!(p.image, "cmd.exe");
        assert_eq!(p.image_path, "C:\\Windows\\System32");
        assert_eq!(parent_file.entity().as_file().unwrap().name, "cmd.exe");

        let c = child.entity().as_process().unwrap();
        assert_eq!(c.process_id, Some(4024));
        assert_eq!(c.hashes["md5"], "84f50f355a74df0fb58b8d6edd2bc197");
        assert_eq!(c.user.as_deref(), Some("NT AUTHORITY\\SYSTEM"));
        assert!(child_file.occurrences(RelationKind::FileOf, &child.id()).is_some());
    }

    #[test]
    fn process_without_parent_is_two_nodes() {
        let mut event = process_event();
        event.as_object_mut().unwrap().remove("parentProcessPath");
        let tuple = dispatch(event).unwrap();
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.anchor().unwrap().kind(), NodeKind::Process);
    }

    #[test]
    fn malformed_pid_keeps_the_node_without_one() {
        for raw in ["-1", "0x1f4", "4294967296"] {
            let tuple = dispatch(json!({
                "event_type": "dnsLookupEvent",
                "hostname": "c2.test",
                "pid": raw,
                "process": "find.exe",
                "processPath": "C:\\Windows\\System32",
                "event_time": 7,
            }))
            .unwrap();
            assert_eq!(tuple.len(), 3, "pid {}", raw);
            let process = tuple.anchor().unwrap().entity().as_process().unwrap();
            assert_eq!(process.process_id, None);
            assert_eq!(process.image, "find.exe");
        }
    }

    #[test]
    fn malformed_parent_pid_still_links_the_launch() {
        let mut event = process_event();
        event["parentPid"] = json!("n/a");
        let tuple = dispatch(event).unwrap();
        assert_eq!(tuple.len(), 4);
        let parent = tuple.get(0).unwrap();
        let child = tuple.get(2).unwrap();
        assert_eq!(parent.entity().as_process().unwrap().process_id, None);
        assert!(parent.occurrences(RelationKind::Launched, &child.id()).is_some());
    }

    #[test]
    fn process_events_other_than_start_are_filtered() {
        let mut event = process_event();
        event["eventType"] = json!("end");
        assert!(dispatch(event).unwrap().is_empty());
    }

    #[test]
    fn unresolved_process_path_is_filtered() {
        let mut event = process_event();
        event["processPath"] = json!("find.exe");
        assert!(dispatch(event).unwrap().is_empty());

        let mut event = process_event();
        event["processPath"] = json!("");
        assert!(dispatch(event).unwrap().is_empty());

        let mut event = process_event();
        event["processPath"] = json!(null);
        assert!(dispatch(event).unwrap().is_empty());
    }

    #[test]
    fn file_write_prefixes_drive() {
        let tuple = dispatch(json!({
            "event_type": "fileWriteEvent",
            "filePath": "Users\\",
            "drive": "C",
            "fileName": "abcd.txt",
            "pid": "8060",
            "process": "outlook.exe",
            "processPath": "C:\\Program Files\\Microsoft Office 15\\root\\office15",
            "textAtLowestOffset": "ValueError",
            "event_time": 1_530_172_480,
        }))
        .unwrap();
        let process = tuple.anchor().unwrap();
        let file = tuple.get(2).unwrap();
        assert_eq!(file.entity().as_file().unwrap().full_path(), "C:\\Users\\abcd.txt");
        let occ = &process.occurrences(RelationKind::Wrote, &file.id()).unwrap()[0];
        assert_eq!(occ["contents"], PropertyValue::from("ValueError"));
    }

    #[test]
    fn url_monitor_wires_five_nodes() {
        let tuple = dispatch(json!({
            "event_type": "urlMonitorEvent",
            "requestUrl": "/foobar",
            "hostname": "omer.com",
            "remoteIpAddress": "10.0.0.1",
            "remotePort": "80",
            "urlMethod": "GET",
            "pid": "1",
            "process": "chrome.exe",
            "processPath": "C:\\Program Files (x86)\\Google\\Chrome\\Application",
            "event_time": 9,
        }))
        .unwrap();
        assert_eq!(tuple.len(), 5);
        let process = tuple.get(0).unwrap();
        let uri = tuple.get(2).unwrap();
        let domain = tuple.get(3).unwrap();
        let ip = tuple.get(4).unwrap();
        assert!(uri.occurrences(RelationKind::UriOf, &domain.id()).is_some());
        assert!(domain.occurrences(RelationKind::ResolvesTo, &ip.id()).is_some());
        let conn = &process.occurrences(RelationKind::ConnectedTo, &ip.id()).unwrap()[0];
        assert_eq!(conn["protocol"], PropertyValue::from("HTTP"));
        assert_eq!(conn["port"], PropertyValue::Int(80));
    }

    #[test]
    fn registry_event_types_map_to_relations() {
        for (event_type, relation) in [
            ("1", RelationKind::ChangedValue),
            ("2", RelationKind::DeletedValue),
            ("3", RelationKind::CreatedKey),
            ("4", RelationKind::DeletedKey),
        ] {
            let tuple = dispatch(json!({
                "event_type": "regKeyEvent",
                "hive": "HKEY_USERS\\S-1",
                "keyPath": "Software\\Microsoft\\Internet Explorer\\Toolbar",
                "eventType": event_type,
                "pid": "3592",
                "process": "explorer.exe",
                "processPath": "C:\\Windows",
                "valueName": "Locked",
                "valueType": "REG_DWORD",
                "text": "....",
                "event_time": 1_526_942_280,
            }))
            .unwrap();
            let process = tuple.anchor().unwrap();
            let key = tuple.get(2).unwrap();
            let reg = key.entity().as_registry_key().unwrap();
            assert_eq!(reg.key, "Locked");
            assert_eq!(reg.value.as_deref(), Some("...."));
            assert_eq!(
                process.occurrences(relation, &key.id()).unwrap(),
                &[ts(1_526_942_280)]
            );
        }
    }

    #[test]
    fn alert_event_wraps_nested_event() {
        let tuple = dispatch(json!({
            "event_type": "alertEvent",
            "match_hash": "1",
            "event_time": 77,
            "_threat_data": {"display_name": "Suspicious Write"},
            "data": {
                "key": {"event_type": "fileWriteEvent"},
                "values": {
                    "filePath": "Users\\",
                    "drive": "C",
                    "fileName": "abcd.txt",
                    "pid": "8060",
                    "process": "outlook.exe",
                    "processPath": "C:\\Program Files\\Microsoft Office 15\\root\\office15",
                    "event_time": 77,
                }
            }
        }))
        .unwrap();
        assert_eq!(tuple.len(), 4);
        let alert = tuple.anchor().unwrap();
        assert_eq!(alert.display(), "Suspicious Write");
        for node in tuple.iter().skip(1) {
            assert_eq!(
                alert.occurrences(RelationKind::AlertedOn, &node.id()).unwrap(),
                &[ts(77)]
            );
        }
    }

    #[test]
    fn missing_pid_is_incomplete() {
        let err = dispatch(json!({
            "event_type": "dnsLookupEvent",
            "hostname": "x.test",
            "process": "a.exe",
            "processPath": "C:\\",
        }))
        .unwrap_err();
        assert_eq!(err, TransformError::incomplete("dnsLookupEvent", "pid"));
    }
}
