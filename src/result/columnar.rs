//! Row-oriented to columnar conversion and back.

use crate::execution::record::UNSERIALIZABLE_MARKER;
use crate::execution::{Cell, Record};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// The only value kinds a persisted result column may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnPrimitive {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

/// Column name to position-aligned values.
pub type ColumnarTable = IndexMap<String, Vec<ColumnPrimitive>>;

impl From<ColumnPrimitive> for Value {
    fn from(p: ColumnPrimitive) -> Self {
        match p {
            ColumnPrimitive::Null => Value::Null,
            ColumnPrimitive::Bool(b) => Value::Bool(b),
            ColumnPrimitive::Number(n) => Value::Number(n),
            ColumnPrimitive::Text(s) => Value::String(s),
        }
    }
}

fn serialized_or_marker<T: Serialize>(value: &T) -> ColumnPrimitive {
    ColumnPrimitive::Text(
        serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE_MARKER.to_string()),
    )
}

/// Coerce one cell: temporal values become ISO text, structured values
/// become their JSON text.
pub fn to_column_primitive(cell: &Cell) -> ColumnPrimitive {
    match cell {
        Cell::Null => ColumnPrimitive::Null,
        Cell::Bool(b) => ColumnPrimitive::Bool(*b),
        Cell::Number(n) => ColumnPrimitive::Number(n.clone()),
        Cell::Text(s) => ColumnPrimitive::Text(s.clone()),
        Cell::Date(_) | Cell::DateTime(_) | Cell::NaiveDateTime(_) | Cell::Time(_) => {
            ColumnPrimitive::Text(cell.temporal_text().unwrap_or_default())
        }
        Cell::Json(v) => value_primitive(v),
        Cell::Bytes(b) => serialized_or_marker(b),
        Cell::Unserializable => ColumnPrimitive::Text(UNSERIALIZABLE_MARKER.to_string()),
    }
}

fn value_primitive(value: &Value) -> ColumnPrimitive {
    match value {
        Value::Null => ColumnPrimitive::Null,
        Value::Bool(b) => ColumnPrimitive::Bool(*b),
        Value::Number(n) => ColumnPrimitive::Number(n.clone()),
        Value::String(s) => ColumnPrimitive::Text(s.clone()),
        other => serialized_or_marker(other),
    }
}

/// Columns appear in first-seen order. A row missing a column contributes
/// null at its position, so every sequence has one entry per row.
pub fn rows_to_columnar(rows: &[Record]) -> ColumnarTable {
    let mut table = ColumnarTable::new();
    for row in rows {
        for name in row.keys() {
            if !table.contains_key(name) {
                table.insert(name.clone(), Vec::with_capacity(rows.len()));
            }
        }
    }

    for row in rows {
        for (name, values) in table.iter_mut() {
            values.push(row.get(name).map_or(ColumnPrimitive::Null, to_column_primitive));
        }
    }
    table
}

/// Read back a persisted columnar value. Anything that is not an object of
/// arrays yields `None`; nested values inside an array are coerced to text.
pub fn parse_columnar_table(value: &Value) -> Option<ColumnarTable> {
    let obj = value.as_object()?;
    let mut table = ColumnarTable::with_capacity(obj.len());
    for (name, column) in obj {
        let items = column.as_array()?;
        table.insert(name.clone(), items.iter().map(value_primitive).collect());
    }
    Some(table)
}

/// Inverse of [`rows_to_columnar`]. Row count is the longest column; short
/// columns are padded with null.
pub fn columnar_to_rows(table: &ColumnarTable) -> Vec<IndexMap<String, ColumnPrimitive>> {
    let len = table.values().map(Vec::len).max().unwrap_or(0);
    (0..len)
        .map(|i| {
            table
                .iter()
                .map(|(name, values)| {
                    let v = values.get(i).cloned().unwrap_or(ColumnPrimitive::Null);
                    (name.clone(), v)
                })
                .collect()
        })
        .collect()
}
