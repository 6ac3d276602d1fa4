use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value as SqlValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TableError;

// ─────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────

/// A native dynamic value held by one field of a [`Row`].
///
/// Each variant corresponds to one [`crate::schema::ColumnType`] tag; the
/// codec in [`crate::codec`] converts between these and SQLite storage
/// values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null sentinel, valid only for nullable columns.
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Millisecond-precision timestamp. Sub-millisecond precision does not
    /// survive the textual storage format.
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Arbitrary JSON, stored as canonical JSON text.
    Json(serde_json::Value),
    /// Opaque bincode bytes produced by [`Value::pack`]. Exact round-trip,
    /// but **not** portable across bincode or program versions; treat the
    /// stored blobs as private to the writing application.
    Serialized(Vec<u8>),
}

impl Value {
    /// Serializes any serde-serializable value into an opaque
    /// [`Value::Serialized`] blob.
    pub fn pack<T: Serialize>(value: &T) -> Result<Self, TableError> {
        let bytes = bincode::serialize(value)
            .map_err(|e| TableError::Serialization(format!("bincode encode: {e}")))?;
        Ok(Value::Serialized(bytes))
    }

    /// Deserializes a [`Value::Serialized`] blob back into a typed value.
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<T, TableError> {
        match self {
            Value::Serialized(bytes) => bincode::deserialize(bytes)
                .map_err(|e| TableError::Serialization(format!("bincode decode: {e}"))),
            other => Err(TableError::Serialization(format!(
                "cannot unpack a {} value",
                other.type_name()
            ))),
        }
    }

    /// Human-readable variant name, used in type-mismatch errors.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
            Value::Serialized(_) => "serialized",
        }
    }

    /// Schema-independent conversion to an SQLite value, used for the
    /// pass-through parameter forms where no declared column type applies.
    pub(crate) fn to_sql_value(&self) -> SqlValue {
        match self {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Integer(i) => SqlValue::Integer(*i),
            Value::Float(f) => SqlValue::Real(*f),
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Timestamp(t) => {
                SqlValue::Text(t.format(crate::codec::TIMESTAMP_FORMAT).to_string())
            }
            Value::Date(d) => SqlValue::Text(d.format(crate::codec::DATE_FORMAT).to_string()),
            Value::Time(t) => SqlValue::Text(t.format(crate::codec::TIME_FORMAT).to_string()),
            Value::Json(j) => SqlValue::Text(serde_json::to_string(j).unwrap_or_default()),
            Value::Serialized(b) => SqlValue::Blob(b.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Timestamp(t)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

// ─────────────────────────────────────────────
// Row
// ─────────────────────────────────────────────

/// An ordered record of `(column name, Value)` pairs.
///
/// Insertion order is preserved; it fixes the column list order of INSERT
/// statements. Setting an already-present name replaces the value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Appends without the replace-by-name check. Used when decoding engine
    /// rows, whose column names are already unique.
    pub(crate) fn push(&mut self, name: String, value: Value) {
        self.fields.push((name, value));
    }
}
