use super::{decode_record, Datasource, DatasourceError, EventStream};
use crate::graph::Process;
use crate::transform::Family;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// The process a sandbox detonated, as written in a report
#[derive(Debug, Clone, Default, Deserialize)]
struct ReportRoot {
    image: String,
    #[serde(default)]
    image_path: String,
    #[serde(default)]
    process_id: Option<u32>,
    #[serde(default)]
    command_line: String,
}

impl From<ReportRoot> for Process {
    fn from(root: ReportRoot) -> Self {
        let mut process = Process::new(root.image, root.image_path)
            .with_command_line(root.command_line);
        process.process_id = root.process_id;
        process
    }
}

#[derive(Debug, Deserialize)]
struct ReportDocument {
    #[serde(default)]
    family: Option<Family>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    root_process: Option<ReportRoot>,
    #[serde(default)]
    events: Vec<Value>,
}

/// A single JSON report: run metadata, the detonated root process, and an
/// `events` array. Read eagerly at open so a broken report fails up front.
#[derive(Debug, Clone)]
pub struct ReportSource {
    name: String,
    family: Family,
    metadata: Map<String, Value>,
    root_process: Option<Process>,
    events: Vec<Value>,
}

impl ReportSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatasourceError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let text =
            std::fs::read_to_string(path).map_err(|e| DatasourceError::initialization(&name, e))?;
        Self::from_json(name, &text)
    }

    pub fn from_json(name: impl Into<String>, text: &str) -> Result<Self, DatasourceError> {
        let name = name.into();
        let doc: ReportDocument =
            serde_json::from_str(text).map_err(|e| DatasourceError::initialization(&name, e))?;
        info!(
            source = %name,
            events = doc.events.len(),
            has_root = doc.root_process.is_some(),
            "loaded report"
        );
        Ok(Self {
            name,
            family: doc.family.unwrap_or_default(),
            metadata: doc.metadata,
            root_process: doc.root_process.map(Process::from),
            events: doc.events,
        })
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }
}

impl Datasource for ReportSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Family {
        self.family
    }

    fn events(&self) -> Result<EventStream<'_>, DatasourceError> {
        Ok(Box::new(
            self.events
                .iter()
                .enumerate()
                .map(|(index, value)| decode_record(index + 1, value.clone())),
        ))
    }

    fn root_process(&self) -> Option<Process> {
        self.root_process.clone()
    }

    fn metadata(&self) -> Map<String, Value> {
        self.metadata.clone()
    }
}
