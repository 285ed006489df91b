//! Result Processor
//!
//! Bounds, redacts and reshapes rows before they are persisted or shown to
//! another LLM stage. Steps always run in the same order: budget, PII mask,
//! business names, columnar conversion.

pub mod budget;
pub mod business_names;
pub mod columnar;
pub mod pii;

pub use budget::limit_rows_and_size;
pub use columnar::{
    columnar_to_rows, parse_columnar_table, rows_to_columnar, ColumnPrimitive, ColumnarTable,
};
pub use pii::{mask_pii, mask_string};

use crate::execution::Record;
use crate::metadata::MetadataSnapshot;
use tracing::info;

/// Output of one processing pass.
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// Bounded, masked, renamed rows; this is what the summary stages see.
    pub rows: Vec<Record>,
    pub table: ColumnarTable,
}

#[derive(Debug, Clone, Copy)]
pub struct ResultProcessor {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self {
            max_rows: 100,
            max_bytes: 200 * 1024,
        }
    }
}

impl ResultProcessor {
    pub fn new(max_rows: usize, max_bytes: usize) -> Self {
        Self {
            max_rows,
            max_bytes,
        }
    }

    pub fn process(&self, rows: Vec<Record>, metadata: &MetadataSnapshot) -> ProcessedResult {
        let received = rows.len();
        let mut rows = limit_rows_and_size(rows, self.max_rows, self.max_bytes);
        mask_pii(&mut rows);

        let renames = metadata.unique_column_business_names();
        let rows = business_names::apply_business_names(rows, &renames);
        let table = rows_to_columnar(&rows);

        info!(
            "Processed result: {} of {} row(s) kept, {} column(s)",
            rows.len(),
            received,
            table.len()
        );
        ProcessedResult { rows, table }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Cell;
    use crate::metadata::{DataColumn, DataTable};

    #[test]
    fn test_mask_runs_before_rename() {
        let snapshot = MetadataSnapshot::new(
            1,
            vec![DataTable {
                schema_name: "public".into(),
                table_name: "customers".into(),
                business_name: None,
                description: None,
                columns: vec![DataColumn {
                    column_name: "email".into(),
                    data_type: "text".into(),
                    is_nullable: false,
                    is_primary_key: false,
                    business_name: Some("Contact".into()),
                    description: None,
                }],
            }],
            vec![],
        );
        let mut row = Record::new();
        row.insert("email".into(), Cell::text("person@example.com"));

        let out = ResultProcessor::default().process(vec![row], &snapshot);
        assert_eq!(out.rows[0]["Contact"], Cell::text("pe***om"));
        assert_eq!(out.table["Contact"], vec![ColumnPrimitive::Text("pe***om".into())]);
    }
}
