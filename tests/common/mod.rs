//! Shared helpers for integration tests
//!
//! Event builders in the generic vocabulary plus a canonical, order-free
//! view of a graph for comparing assembly results.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use trailgraph::graph::Process;
use trailgraph::transform::generic::{fields, kinds};
use trailgraph::{EventRecord, Family, Graph, MemorySource, NodeId, Pipeline};

pub fn actor(kind: &str) -> EventRecord {
    EventRecord::of_kind(kind)
        .with(fields::PROCESS_IMAGE, "<PATH_SAMPLE.EXE>")
        .with(fields::PROCESS_IMAGE_PATH, "\\")
        .with(fields::PROCESS_ID, 3420)
}

pub fn launch(timestamp: i64) -> EventRecord {
    EventRecord::of_kind(kinds::PROCESS_LAUNCHED)
        .with(fields::PARENT_PROCESS_IMAGE, "cmd.exe")
        .with(fields::PARENT_PROCESS_IMAGE_PATH, "<SYSTEM32>")
        .with(fields::PROCESS_IMAGE, "ping.exe")
        .with(fields::PROCESS_IMAGE_PATH, "\\")
        .with(fields::PROCESS_ID, 636)
        .with(fields::TIMESTAMP, timestamp)
}

pub fn file_written(path: &str) -> EventRecord {
    actor(kinds::FILE_WRITTEN).with(fields::FILE_PATH, path)
}

pub fn http_request(host: &str, ip: &str) -> EventRecord {
    actor(kinds::HTTP_REQUEST)
        .with(fields::HTTP_HOST, host)
        .with(fields::IP_ADDRESS, ip)
        .with(fields::URI, "/")
        .with(fields::HTTP_METHOD, "GET")
}

pub fn dns_lookup(host: &str, addresses: &[&str]) -> EventRecord {
    let record = actor(kinds::DNS_LOOKUP).with(fields::HTTP_HOST, host);
    if addresses.is_empty() {
        record
    } else {
        record.with(fields::RESOLVED_ADDRESSES, addresses.to_vec())
    }
}

pub fn reg_key_set(hive: &str, key_path: &str, key: &str, value: &str) -> EventRecord {
    actor(kinds::REG_KEY_SET)
        .with(fields::HIVE, hive)
        .with(fields::REG_KEY_PATH, key_path)
        .with(fields::REG_KEY, key)
        .with(fields::REG_KEY_VALUE, value)
}

pub fn sample_process() -> Process {
    Process::new("<PATH_SAMPLE.EXE>", "\\").with_pid(3420)
}

/// Run generic records through a fresh pipeline into a graph
pub async fn build(records: Vec<EventRecord>) -> Graph {
    let source = MemorySource::new("test", Family::Generic).with_records(records);
    let (graph, _) = Pipeline::new(Family::Generic)
        .build_graph(&source)
        .await
        .expect("in-memory runs cannot fail");
    graph
}

/// Vertex set plus, per vertex, each (kind, target) with its occurrence
/// multiset. Independent of insertion and list order.
pub type CanonicalGraph = BTreeMap<NodeId, BTreeSet<(String, NodeId, Vec<String>)>>;

pub fn canonical(graph: &Graph) -> CanonicalGraph {
    graph
        .nodes()
        .map(|node| {
            let relations = node
                .relations()
                .iter()
                .map(|rel| {
                    let mut occurrences: Vec<String> = rel
                        .occurrences
                        .iter()
                        .map(|attrs| serde_json::to_string(attrs).unwrap())
                        .collect();
                    occurrences.sort();
                    (rel.kind.to_string(), rel.target, occurrences)
                })
                .collect();
            (node.id(), relations)
        })
        .collect()
}
