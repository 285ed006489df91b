use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataColumn {
    pub column_name: String,
    pub data_type: String,
    #[serde(default)]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTable {
    pub schema_name: String,
    pub table_name: String,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<DataColumn>,
}

impl DataTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// A fully qualified column, as declared in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    #[serde(default)]
    pub constraint_name: Option<String>,
    pub from: ColumnRef,
    pub to: ColumnRef,
}

/// A column reference recovered from SQL text. The schema is absent when
/// the dialect has no default schema and the query did not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
}

impl ResolvedColumn {
    fn matches(&self, declared: &ColumnRef) -> bool {
        self.schema
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&declared.schema))
            && self.table.eq_ignore_ascii_case(&declared.table)
            && self.column.eq_ignore_ascii_case(&declared.column)
    }
}

impl std::fmt::Display for ResolvedColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}.{}", schema, self.table, self.column),
            None => write!(f, "{}.{}", self.table, self.column),
        }
    }
}

/// Tables, columns and the foreign-key graph of exactly one workspace, as
/// produced by the latest successful ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub workspace_id: i64,
    #[serde(default)]
    pub tables: Vec<DataTable>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl MetadataSnapshot {
    pub fn new(workspace_id: i64, tables: Vec<DataTable>, foreign_keys: Vec<ForeignKey>) -> Self {
        Self {
            workspace_id,
            tables,
            foreign_keys,
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NlqError::Config(format!("Failed to read metadata {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Distinct schema names of the snapshot's tables.
    pub fn schemas(&self) -> BTreeSet<String> {
        self.tables.iter().map(|t| t.schema_name.clone()).collect()
    }

    pub fn first_table(&self) -> Option<&DataTable> {
        self.tables.first()
    }

    /// True when `a = b` follows a declared foreign key in either direction.
    pub fn is_declared_join(&self, a: &ResolvedColumn, b: &ResolvedColumn) -> bool {
        self.foreign_keys.iter().any(|fk| {
            (a.matches(&fk.from) && b.matches(&fk.to)) || (a.matches(&fk.to) && b.matches(&fk.from))
        })
    }

    /// Technical column name to business name, restricted to business names
    /// used by exactly one column across the whole snapshot.
    pub fn unique_column_business_names(&self) -> HashMap<String, String> {
        let mut usage: HashMap<&str, usize> = HashMap::new();
        for column in self.tables.iter().flat_map(|t| &t.columns) {
            if let Some(name) = non_blank(&column.business_name) {
                *usage.entry(name).or_insert(0) += 1;
            }
        }

        let mut renames = HashMap::new();
        for column in self.tables.iter().flat_map(|t| &t.columns) {
            if let Some(name) = non_blank(&column.business_name) {
                if usage.get(name) == Some(&1) {
                    renames.insert(column.column_name.clone(), name.to_string());
                }
            }
        }
        renames
    }
}

fn non_blank(name: &Option<String>) -> Option<&str> {
    name.as_deref().filter(|n| !n.trim().is_empty())
}
