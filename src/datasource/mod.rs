//! Datasources: where event records come from
//!
//! A datasource is a finite, restartable sequence of event records plus an
//! optional root process and run metadata. Each call to
//! [`Datasource::events`] yields a fresh sequence from the start.

mod jsonl;
mod memory;
mod report;

pub use jsonl::JsonLinesSource;
pub use memory::MemorySource;
pub use report::ReportSource;

use crate::graph::Process;
use crate::transform::{EventRecord, Family};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by a datasource
#[derive(Debug, Error)]
pub enum DatasourceError {
    /// The source could not be opened at all; the run does not start
    #[error("cannot open datasource {name}: {reason}")]
    Initialization { name: String, reason: String },

    /// A single record could not be decoded; the run continues
    #[error("record {line}: {reason}")]
    Record { line: usize, reason: String },
}

impl DatasourceError {
    pub fn initialization(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Initialization {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Initialization { .. })
    }
}

/// A lazy sequence of decoded records
pub type EventStream<'a> =
    Box<dyn Iterator<Item = Result<EventRecord, DatasourceError>> + Send + 'a>;

pub trait Datasource: Send + Sync {
    /// Human-readable name, recorded on the graph
    fn name(&self) -> &str;

    /// The transformer family whose vocabulary this source speaks
    fn family(&self) -> Family;

    /// Start a fresh pass over the records
    fn events(&self) -> Result<EventStream<'_>, DatasourceError>;

    /// Fallback actor for events that name none
    fn root_process(&self) -> Option<Process> {
        None
    }

    fn metadata(&self) -> Map<String, Value> {
        Map::new()
    }
}

impl<D: Datasource + ?Sized> Datasource for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn family(&self) -> Family {
        (**self).family()
    }

    fn events(&self) -> Result<EventStream<'_>, DatasourceError> {
        (**self).events()
    }

    fn root_process(&self) -> Option<Process> {
        (**self).root_process()
    }

    fn metadata(&self) -> Map<String, Value> {
        (**self).metadata()
    }
}

/// Decode one JSON value into a record, numbering failures by position
pub(crate) fn decode_record(line: usize, value: Value) -> Result<EventRecord, DatasourceError> {
    EventRecord::try_from(value).map_err(|other| DatasourceError::Record {
        line,
        reason: format!("expected a JSON object, found {}", json_type(&other)),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
