//! Decoded telemetry values.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::Serialize;

/// A decoded value. Serializes as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(Fields),
}

/// Field name to value.
pub type Fields = BTreeMap<String, Value>;

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Nested fields decoded from one command code.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Fields);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Look up a value by key path.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.0.get(*first)?;
        for key in rest {
            match value {
                Value::Map(map) => value = map.get(*key)?,
                _ => return None,
            }
        }
        Some(value)
    }

    pub fn get_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.0.get_mut(*first)?;
        for key in rest {
            match value {
                Value::Map(map) => value = map.get_mut(*key)?,
                _ => return None,
            }
        }
        Some(value)
    }

    pub fn get_f64(&self, path: &[&str]) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Store `value` at `path`, creating intermediate maps as needed. A
    /// non-map value in the way is replaced.
    pub fn insert(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut map = &mut self.0;
        for key in parents {
            let entry = map.entry((*key).to_string()).or_insert_with(|| Value::Map(Fields::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(Fields::new());
            }
            map = match entry {
                Value::Map(inner) => inner,
                _ => unreachable!("entry was just made a map"),
            };
        }
        map.insert((*last).to_string(), value);
    }

    /// Overlay `other`, merging nested maps key by key.
    pub fn merge(&mut self, other: Record) {
        merge_fields(&mut self.0, other.0);
    }
}

fn merge_fields(into: &mut Fields, from: Fields) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => merge_fields(existing, incoming),
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

/// The latest record for one command code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub command: u8,
    pub fields: Record,
    /// Seconds since the Unix epoch.
    pub last_update: f64,
}

impl TelemetryRecord {
    pub fn new(command: u8, fields: Record) -> Self {
        Self { command, fields, last_update: unix_now() }
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
