//! Business-name suggestions for ingested tables.

use crate::error::{NlqError, Result};
use crate::llm::{strip_code_fences, LlmProvider, ResponseFormat};
use crate::metadata::{DataTable, MetadataSnapshot};
use crate::prompts;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameAndDescription {
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSuggestion {
    pub column_name: String,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSuggestion {
    #[serde(default)]
    pub table: NameAndDescription,
    #[serde(default)]
    pub columns: Vec<ColumnSuggestion>,
}

pub fn parse_suggestion(text: &str) -> Result<TableSuggestion> {
    serde_json::from_str(&strip_code_fences(text))
        .map_err(|e| NlqError::Llm(format!("Failed to parse business names: {}", e)))
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Copy suggested names onto the table. Columns the model invented are
/// ignored; blank suggestions keep what was there.
pub fn apply_suggestion(table: &mut DataTable, suggestion: TableSuggestion) {
    if let Some(name) = non_blank(suggestion.table.business_name) {
        table.business_name = Some(name);
    }
    if let Some(desc) = non_blank(suggestion.table.description) {
        table.description = Some(desc);
    }
    for s in suggestion.columns {
        if let Some(column) = table.columns.iter_mut().find(|c| c.column_name == s.column_name) {
            if let Some(name) = non_blank(s.business_name) {
                column.business_name = Some(name);
            }
            if let Some(desc) = non_blank(s.description) {
                column.description = Some(desc);
            }
        }
    }
}

pub struct BusinessNamer {
    llm: Arc<dyn LlmProvider>,
}

impl BusinessNamer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn suggest(&self, table: &DataTable, snapshot: &MetadataSnapshot) -> Result<TableSuggestion> {
        let prompt = prompts::build_business_names_prompt(table, &snapshot.foreign_keys)?;
        let text = self
            .llm
            .complete(&prompt.messages, prompt.max_tokens, ResponseFormat::JsonObject)
            .await?;
        parse_suggestion(&text)
    }

    /// Name every table in turn. A failure for one table leaves it as it was
    /// and moves on. Returns how many tables were updated.
    pub async fn name_tables(&self, snapshot: &mut MetadataSnapshot) -> usize {
        let mut named = 0;
        for i in 0..snapshot.tables.len() {
            let qualified = snapshot.tables[i].qualified_name();
            match self.suggest(&snapshot.tables[i], snapshot).await {
                Ok(suggestion) => {
                    apply_suggestion(&mut snapshot.tables[i], suggestion);
                    named += 1;
                }
                Err(e) => warn!("Business naming skipped for {}: {}", qualified, e),
            }
        }
        info!("Business names applied to {} of {} table(s)", named, snapshot.tables.len());
        named
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DataColumn;

    fn table() -> DataTable {
        DataTable {
            schema_name: "public".into(),
            table_name: "ord".into(),
            business_name: None,
            description: None,
            columns: vec![DataColumn {
                column_name: "amt".into(),
                data_type: "numeric".into(),
                is_nullable: true,
                is_primary_key: false,
                business_name: Some("Old".into()),
                description: None,
            }],
        }
    }

    #[test]
    fn test_apply_fenced_suggestion() {
        let text = "```json\n{\"table\": {\"businessName\": \"Order\", \"description\": \"Customer orders\"}, \"columns\": [{\"columnName\": \"amt\", \"businessName\": \"Amount\", \"description\": \"\"}, {\"columnName\": \"ghost\", \"businessName\": \"Ghost\"}]}\n```";
        let mut t = table();
        apply_suggestion(&mut t, parse_suggestion(text).unwrap());
        assert_eq!(t.business_name.as_deref(), Some("Order"));
        assert_eq!(t.columns.len(), 1);
        assert_eq!(t.columns[0].business_name.as_deref(), Some("Amount"));
        assert_eq!(t.columns[0].description, None);
    }

    #[test]
    fn test_blank_name_keeps_existing() {
        let mut t = table();
        apply_suggestion(
            &mut t,
            parse_suggestion(r#"{"columns": [{"columnName": "amt", "businessName": " "}]}"#).unwrap(),
        );
        assert_eq!(t.columns[0].business_name.as_deref(), Some("Old"));
    }

    #[test]
    fn test_non_json_is_error() {
        assert!(parse_suggestion("Sure! Here are the names").is_err());
    }

    /// Names `ord`, fails for every other table.
    struct OrdOnly;

    #[async_trait::async_trait]
    impl LlmProvider for OrdOnly {
        async fn complete(
            &self,
            messages: &[crate::llm::ChatMessage],
            _max_tokens: u32,
            _format: ResponseFormat,
        ) -> Result<String> {
            if messages.iter().any(|m| m.content.contains("Table: public.ord\n")) {
                Ok(r#"{"table": {"businessName": "Order"}, "columns": []}"#.to_string())
            } else {
                Err(NlqError::Llm("timeout".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_one_failing_table_does_not_block_others() {
        let mut other = table();
        other.table_name = "cust".into();
        let mut snapshot = MetadataSnapshot::new(1, vec![other, table()], vec![]);

        let named = BusinessNamer::new(Arc::new(OrdOnly))
            .name_tables(&mut snapshot)
            .await;
        assert_eq!(named, 1);
        assert_eq!(snapshot.tables[0].business_name, None);
        assert_eq!(snapshot.tables[1].business_name.as_deref(), Some("Order"));
    }
}
