use super::{Datasource, DatasourceError, EventStream};
use crate::graph::Process;
use crate::transform::{EventRecord, Family};
use serde_json::{Map, Value};

/// Records held in memory. Mostly useful for tests and embedding callers
/// that already decoded their telemetry.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    family: Family,
    records: Vec<EventRecord>,
    root_process: Option<Process>,
    metadata: Map<String, Value>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, family: Family) -> Self {
        Self {
            name: name.into(),
            family,
            records: Vec::new(),
            root_process: None,
            metadata: Map::new(),
        }
    }

    pub fn with_records<I: IntoIterator<Item = EventRecord>>(mut self, records: I) -> Self {
        self.records.extend(records);
        self
    }

    pub fn with_root_process(mut self, root: Process) -> Self {
        self.root_process = Some(root);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn push(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Datasource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Family {
        self.family
    }

    fn events(&self) -> Result<EventStream<'_>, DatasourceError> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }

    fn root_process(&self) -> Option<Process> {
        self.root_process.clone()
    }

    fn metadata(&self) -> Map<String, Value> {
        self.metadata.clone()
    }
}
