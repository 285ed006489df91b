//! Candidate SQL: LLM responses and the deterministic fallback.

use crate::llm::strip_code_fences;
use crate::metadata::MetadataSnapshot;
use serde_json::Value;

/// Columns the fallback query selects from the first table.
pub const STUB_COLUMNS: usize = 5;

/// Where the candidate SQL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOrigin {
    Llm,
    Stub,
    Repair,
}

/// Read SQL out of a model response.
///
/// A JSON body must be an object with a string `sql`; any other JSON yields
/// nothing. A body that is not JSON at all is taken as SQL text.
pub fn parse_sql_response(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let cleaned = strip_code_fences(raw);
    let sql = match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(obj)) => obj.get("sql").and_then(Value::as_str)?.trim().to_string(),
        Ok(_) => return None,
        Err(_) => cleaned,
    };
    Some(sql).filter(|s| !s.is_empty())
}

/// `SELECT` up to five fully qualified columns of the first table, `*` when
/// it has none, or `SELECT 1` when the workspace has no tables.
pub fn stub_sql(snapshot: &MetadataSnapshot) -> String {
    let Some(table) = snapshot.first_table() else {
        return "SELECT 1".to_string();
    };
    let qualified = table.qualified_name();
    let columns: Vec<String> = table
        .columns
        .iter()
        .take(STUB_COLUMNS)
        .map(|c| format!("{}.{}", qualified, c.column_name))
        .collect();
    let select_list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };
    format!("SELECT {} FROM {}", select_list, qualified)
}
