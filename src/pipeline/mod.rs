//! Pipeline Orchestrator
//!
//! Sequences SQL generation, guard, execution, result processing and the
//! best-effort summary stages for one request, and owns its lifecycle.

pub mod orchestrator;
pub mod sql_source;

pub use orchestrator::{PipelineComponents, QueryPipeline};
pub use sql_source::{parse_sql_response, stub_sql, SqlOrigin};

use crate::config::AppConfig;
use crate::request::{Request, RequestStatus};
use crate::result::{parse_columnar_table, ColumnarTable};
use serde::Serialize;
use std::time::Duration;

/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// How many requests `get_all` returns.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub force_limit: u64,
    pub max_rows: usize,
    pub max_bytes: usize,
    pub query_timeout: Duration,
    pub forbid_free_joins: bool,
    pub sql_repair_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            force_limit: config.force_limit,
            max_rows: config.max_rows,
            max_bytes: config.max_bytes,
            query_timeout: config.query_timeout,
            forbid_free_joins: true,
            sql_repair_enabled: config.sql_repair_enabled,
        }
    }
}

/// What callers get back for a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestResult {
    pub request_id: i64,
    pub status: RequestStatus,
    /// Only set on the response to the call that ran the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Only set in history listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_table: Option<ColumnarTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_config: Option<serde_json::Value>,
}

impl DataRequestResult {
    /// Re-read a stored request. A stored table that is not columnar is
    /// reported as absent.
    pub fn from_stored(request: &Request, include_prompt: bool) -> Self {
        Self {
            request_id: request.id,
            status: request.status,
            response_id: None,
            prompt: include_prompt.then(|| request.prompt.clone()),
            sql_script: request.sql_script.clone(),
            result_text: request.result_text.clone(),
            result_table: request.result_table.as_ref().and_then(parse_columnar_table),
            graph_config: request.graph_config.clone(),
        }
    }
}
