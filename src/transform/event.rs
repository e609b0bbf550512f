//! Canonical event records
//!
//! A record is a flat JSON object tagged with an `event_type` discriminator.
//! Field access is forgiving: optional fields come back as `None` or empty,
//! and numbers may arrive as JSON numbers or numeric strings.

use super::error::TransformError;
use crate::graph::{Attributes, PropertyValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field carrying the event-kind discriminator
pub const KIND_FIELD: &str = "event_type";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(Map<String, Value>);

impl EventRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a record of the given kind
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self::new().with(KIND_FIELD, kind.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn kind(&self) -> Option<&str> {
        self.str(KIND_FIELD)
    }

    /// Kind label for log lines and error messages
    pub fn kind_label(&self) -> &str {
        self.kind().unwrap_or("untyped")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// String field, or empty when absent
    pub fn string(&self, key: &str) -> String {
        self.str(key).map(str::to_string).unwrap_or_default()
    }

    /// Non-empty string field
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.str(key).filter(|s| !s.is_empty())
    }

    /// Integer field; numeric strings are accepted
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|i| i != 0),
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            _ => false,
        }
    }

    /// A nested object as its own record
    pub fn object(&self, key: &str) -> Option<EventRecord> {
        self.get(key).and_then(Value::as_object).cloned().map(Self)
    }

    /// Follow a path of nested object keys down to a string
    pub fn path_str(&self, path: &[&str]) -> Option<&str> {
        let (last, parents) = path.split_last()?;
        let mut current = &self.0;
        for key in parents {
            current = current.get(*key)?.as_object()?;
        }
        current.get(*last)?.as_str()
    }

    /// String list; a single string counts as a one-element list
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.get(key).and_then(PropertyValue::from_json)
    }

    /// String map (e.g. `{"md5": "..."}`); non-string values are skipped
    pub fn string_map(&self, key: &str) -> std::collections::BTreeMap<String, String> {
        self.get(key)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn require_str(&self, key: &str) -> Result<&str, TransformError> {
        self.str(key)
            .ok_or_else(|| TransformError::incomplete(self.kind_label(), key))
    }

    pub fn require_int(&self, key: &str) -> Result<i64, TransformError> {
        self.int(key)
            .ok_or_else(|| TransformError::incomplete(self.kind_label(), key))
    }

    /// `{timestamp}` when the record carries one, otherwise an empty record
    pub fn timestamp_attrs(&self, key: &str) -> Attributes {
        let mut attrs = Attributes::new();
        self.copy_into(&mut attrs, key, "timestamp");
        attrs
    }

    /// Copy field `key` into `attrs` under `name`, if present
    pub fn copy_into(&self, attrs: &mut Attributes, key: &str, name: &str) {
        if let Some(value) = self.property(key) {
            attrs.insert(name.to_string(), value);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for EventRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for EventRecord {
    type Error = Value;

    /// Only JSON objects are records; anything else is handed back
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
