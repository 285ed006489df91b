use crate::execution::Record;
use tracing::debug;

/// Serialized JSON size of a row set, in bytes.
pub fn serialized_size(rows: &[Record]) -> usize {
    serde_json::to_vec(rows).map(|b| b.len()).unwrap_or(usize::MAX)
}

/// Truncate to `max_rows`, then drop 20% of the remaining rows (rounded up)
/// until the serialized set fits `max_bytes` or a single row is left.
pub fn limit_rows_and_size(mut rows: Vec<Record>, max_rows: usize, max_bytes: usize) -> Vec<Record> {
    rows.truncate(max_rows);

    while rows.len() > 1 && serialized_size(&rows) > max_bytes {
        let drop = (rows.len() + 4) / 5;
        let keep = rows.len().saturating_sub(drop).max(1);
        rows.truncate(keep);
    }

    debug!("Result budget kept {} row(s)", rows.len());
    rows
}
