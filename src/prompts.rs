//! Prompt templates and builders for every LLM stage.

use crate::error::{NlqError, Result};
use crate::execution::Record;
use crate::llm::ChatMessage;
use crate::metadata::{DataColumn, DataTable, ForeignKey};
use serde::Serialize;
use std::collections::HashMap;

pub const SQL_GENERATE: &str = "sql-generate";
pub const SQL_REPAIR: &str = "sql-repair";
pub const RESULT_TEXT: &str = "result-text";
pub const GRAPH_CONFIG: &str = "graph-config";
pub const BUSINESS_NAMES: &str = "business-names";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system: &'static str,
    pub user: &'static str,
    pub max_tokens: u32,
}

/// Messages plus the token budget of the template they came from.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

const SQL_RULES: &str = "Rules:
- Only SELECT queries; no CTEs, DDL, DML, temp tables, functions that mutate state.
- Use only the provided schemas, tables and columns.
- Prefer explicit table-qualified names schema.table.column.
- Use INNER/LEFT JOINs only on provided foreign keys, with alias-qualified columns on both sides.
- Always include a LIMIT clause if not present.
- Never guess columns or tables not listed.
- Return ONLY a compact JSON object of shape { \"sql\": \"...\" } with no extra text.";

lazy_static::lazy_static! {
    static ref TEMPLATES: HashMap<&'static str, PromptTemplate> = {
        let mut m = HashMap::new();
        m.insert(SQL_GENERATE, PromptTemplate {
            system: "You are a cautious SQL assistant.\nTask: generate a single safe SELECT-only SQL query for a BI question.\n{{rules}}",
            user: "Question: {{prompt}}\n\nAvailable schemas/tables/columns:\n{{metadata}}\n\nForeign keys:\n{{foreignKeys}}\n\nOutput JSON strictly as {\"sql\":\"...\"}.",
            max_tokens: 1024,
        });
        m.insert(SQL_REPAIR, PromptTemplate {
            system: "You are a cautious SQL assistant fixing a query that was rejected or failed.\nTask: return a corrected single SELECT-only SQL query that answers the same question.\n{{rules}}",
            user: "Question: {{prompt}}\n\nPrevious SQL:\n{{previousSql}}\n\nError:\n{{dbError}}\n\nAvailable schemas/tables/columns:\n{{metadata}}\n\nForeign keys:\n{{foreignKeys}}\n\nOutput JSON strictly as {\"sql\":\"...\"}.",
            max_tokens: 1024,
        });
        m.insert(RESULT_TEXT, PromptTemplate {
            system: "You are a formatter.\nGiven rows (JSON array of objects) from a BI query, produce a short human-friendly summary in the language of the data.\nRules:\n- Return plain text only, 3-6 concise lines.\n- Use readable formatting for numbers and currencies if present.\n- Do not fabricate values; only summarize given rows.",
            user: "Rows (JSON):\n{{rows}}\n\nWrite the summary text only.",
            max_tokens: 512,
        });
        m.insert(GRAPH_CONFIG, PromptTemplate {
            system: "You are a data viz planner.\nGiven tabular rows (JSON array of objects), propose a compact graph configuration JSON for a dashboard.\nRules:\n- Choose one of graph types: BAR_CHART | LINE_CHART | PIE_CHART | SCATTER_PLOT | AREA_CHART | HISTOGRAM | BOX_PLOT | HEATMAP | GEOGRAPHIC_MAP | RADAR_CHART | BUBBLE_CHART | FUNNEL_CHART | TREE_MAP.\n- Include fields: { \"type\": GRAPH_TYPE, \"x\": string, \"y\": string | string[], \"seriesBy\"?: string }.\n- Pick fields that exist in rows.\n- Keep it minimal and valid JSON. Return ONLY the JSON object.",
            user: "Rows (JSON):\n{{rows}}",
            max_tokens: 512,
        });
        m.insert(BUSINESS_NAMES, PromptTemplate {
            system: "You are a precise data modeling assistant.\nGiven a database table (schema + technical name) and its columns (technical names, data types, and key flags), propose business-friendly names and a concise description for the table and each column.\nRules:\n- Keep names short (1-4 words), readable and domain-neutral unless obvious from names.\n- Respect language cues from technical names; otherwise prefer English.\n- Do not invent fields; only rename provided ones.\n- Avoid acronyms unless clearly standard (e.g., ID, VAT).\n- Output strictly a JSON object with shape:\n{\n  \"table\": { \"businessName\": string, \"description\": string },\n  \"columns\": [ { \"columnName\": string, \"businessName\": string, \"description\": string } ]\n}",
            user: "Table: {{schema}}.{{table}}\nColumns:\n{{columns}}\n\nReturn ONLY the JSON object.",
            max_tokens: 1024,
        });
        m
    };
}

pub struct PromptRegistry;

impl PromptRegistry {
    pub fn get(key: &str) -> Result<&'static PromptTemplate> {
        TEMPLATES
            .get(key)
            .ok_or_else(|| NlqError::Config(format!("No prompt template for key \"{}\"", key)))
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn build(key: &str, vars: &[(&str, &str)]) -> Result<BuiltPrompt> {
    let tpl = PromptRegistry::get(key)?;
    let system = render(tpl.system, &[("rules", SQL_RULES)]);
    Ok(BuiltPrompt {
        messages: vec![
            ChatMessage::system(system.trim()),
            ChatMessage::user(render(tpl.user, vars).trim()),
        ],
        max_tokens: tpl.max_tokens,
    })
}

pub fn build_sql_prompt(
    prompt: &str,
    tables: &[DataTable],
    foreign_keys: &[ForeignKey],
) -> Result<BuiltPrompt> {
    let metadata = pretty(tables)?;
    let fks = pretty(foreign_keys)?;
    build(
        SQL_GENERATE,
        &[("prompt", prompt), ("metadata", metadata.as_str()), ("foreignKeys", fks.as_str())],
    )
}

pub fn build_sql_repair_prompt(
    prompt: &str,
    previous_sql: &str,
    error: &str,
    tables: &[DataTable],
    foreign_keys: &[ForeignKey],
) -> Result<BuiltPrompt> {
    let metadata = pretty(tables)?;
    let fks = pretty(foreign_keys)?;
    build(
        SQL_REPAIR,
        &[
            ("prompt", prompt),
            ("previousSql", previous_sql),
            ("dbError", error),
            ("metadata", metadata.as_str()),
            ("foreignKeys", fks.as_str()),
        ],
    )
}

pub fn build_result_text_prompt(rows: &[Record]) -> Result<BuiltPrompt> {
    build(RESULT_TEXT, &[("rows", pretty(rows)?.as_str())])
}

pub fn build_graph_config_prompt(rows: &[Record]) -> Result<BuiltPrompt> {
    build(GRAPH_CONFIG, &[("rows", pretty(rows)?.as_str())])
}

/// Column facts sent to the business-naming prompt.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ColumnFacts<'a> {
    column_name: &'a str,
    data_type: &'a str,
    is_primary_key: bool,
    is_foreign_key: bool,
    is_nullable: bool,
}

pub fn build_business_names_prompt(
    table: &DataTable,
    foreign_keys: &[ForeignKey],
) -> Result<BuiltPrompt> {
    let is_fk = |c: &DataColumn| {
        foreign_keys.iter().any(|fk| {
            fk.from.schema == table.schema_name
                && fk.from.table == table.table_name
                && fk.from.column == c.column_name
        })
    };
    let columns: Vec<ColumnFacts> = table
        .columns
        .iter()
        .map(|c| ColumnFacts {
            column_name: &c.column_name,
            data_type: &c.data_type,
            is_primary_key: c.is_primary_key,
            is_foreign_key: is_fk(c),
            is_nullable: c.is_nullable,
        })
        .collect();
    build(
        BUSINESS_NAMES,
        &[
            ("schema", table.schema_name.as_str()),
            ("table", table.table_name.as_str()),
            ("columns", pretty(&columns)?.as_str()),
        ],
    )
}
