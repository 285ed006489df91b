//! Row-oriented records as returned by the engines.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use sqlx::{ColumnIndex, Decode, Row, Type};

/// One column value of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Time(NaiveTime),
    Json(Value),
    Bytes(Vec<u8>),
    /// The engine returned something that could not be decoded.
    Unserializable,
}

/// Column name to value, in select-list order.
pub type Record = IndexMap<String, Cell>;

pub const UNSERIALIZABLE_MARKER: &str = "[unserializable]";

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Non-finite floats have no JSON form and become null.
    pub fn float(f: f64) -> Self {
        Number::from_f64(f).map_or(Cell::Null, Cell::Number)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// ISO-8601 text for temporal values.
    pub fn temporal_text(&self) -> Option<String> {
        match self {
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Cell::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Cell::NaiveDateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            Cell::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            _ => None,
        }
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n.into())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Number(n) => Cell::Number(n),
            Value::String(s) => Cell::Text(s),
            other => Cell::Json(other),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Number(n) => n.serialize(serializer),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Date(_) | Cell::DateTime(_) | Cell::NaiveDateTime(_) | Cell::Time(_) => {
                serializer.serialize_str(&self.temporal_text().unwrap_or_default())
            }
            Cell::Json(v) => v.serialize(serializer),
            Cell::Bytes(b) => b.serialize(serializer),
            Cell::Unserializable => serializer.serialize_str(UNSERIALIZABLE_MARKER),
        }
    }
}

/// Decode column `index` as `T`, mapping SQL NULL to [`Cell::Null`] and a
/// decode failure to [`Cell::Unserializable`].
pub(crate) fn decode_cell<'r, R, T>(row: &'r R, index: usize, wrap: impl FnOnce(T) -> Cell) -> Cell
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Cell::Null,
        Err(_) => Cell::Unserializable,
    }
}

/// Binary payloads that are valid UTF-8 are returned as text.
pub(crate) fn bytes_cell(bytes: Vec<u8>) -> Cell {
    match String::from_utf8(bytes) {
        Ok(s) => Cell::Text(s),
        Err(e) => Cell::Bytes(e.into_bytes()),
    }
}
