//! Request lifecycle: create PENDING, run every stage, write one terminal
//! update, answer history reads.

use super::sql_source::{parse_sql_response, stub_sql, SqlOrigin};
use super::{DataRequestResult, PipelineSettings, HISTORY_LIMIT, MAX_PROMPT_CHARS};
use crate::connection::ConnectionConfig;
use crate::error::{NlqError, Result};
use crate::execution::{QueryExecutor, Record};
use crate::guard::{GuardOptions, SqlGuard};
use crate::llm::{strip_code_fences, LlmProvider, ResponseFormat};
use crate::metadata::MetadataSnapshot;
use crate::prompts::{self, BuiltPrompt};
use crate::providers::{ConnectionConfigProvider, MetadataProvider, WorkspaceDirectory};
use crate::rate_limit::WorkspaceRateLimiter;
use crate::request::{RequestStatus, RequestStore, TerminalUpdate};
use crate::result::{ColumnarTable, ResultProcessor};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything the pipeline talks to.
#[derive(Clone)]
pub struct PipelineComponents {
    pub workspaces: Arc<dyn WorkspaceDirectory>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub connections: Arc<dyn ConnectionConfigProvider>,
    pub requests: Arc<dyn RequestStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub executor: Arc<dyn QueryExecutor>,
    pub limiter: Arc<WorkspaceRateLimiter>,
}

/// A stage failed after the request row was created.
struct StageFailure {
    error: NlqError,
    /// SQL that passed the guard, if any did.
    guarded_sql: Option<String>,
}

impl StageFailure {
    fn new(error: impl Into<NlqError>, guarded_sql: Option<String>) -> Self {
        Self {
            error: error.into(),
            guarded_sql,
        }
    }
}

struct StageOutput {
    sql: String,
    table: ColumnarTable,
    table_json: Value,
    result_text: Option<String>,
    graph_config: Option<Value>,
}

/// Why an attempt at a candidate SQL statement did not produce rows.
enum AttemptError {
    Guard(crate::error::GuardViolation),
    Execution(crate::error::ExecutionError, String),
}

impl AttemptError {
    /// Feedback for the repair prompt.
    fn feedback(&self) -> String {
        match self {
            AttemptError::Guard(v) => v.to_string(),
            AttemptError::Execution(e, _) => e.engine_message().to_string(),
        }
    }

    fn into_failure(self) -> StageFailure {
        match self {
            AttemptError::Guard(v) => StageFailure::new(v, None),
            AttemptError::Execution(e, sql) => StageFailure::new(e, Some(sql)),
        }
    }
}

pub struct QueryPipeline {
    components: PipelineComponents,
    settings: PipelineSettings,
    processor: ResultProcessor,
}

impl QueryPipeline {
    pub fn new(components: PipelineComponents, settings: PipelineSettings) -> Self {
        let processor = ResultProcessor::new(settings.max_rows, settings.max_bytes);
        Self {
            components,
            settings,
            processor,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one natural-language request end to end.
    ///
    /// Failures before the request row exists leave no record. Once it
    /// exists, the request always ends SUCCEEDED or FAILED.
    pub async fn create_and_execute(
        &self,
        user_id: i64,
        workspace_id: i64,
        prompt: &str,
    ) -> Result<DataRequestResult> {
        self.components.limiter.check(workspace_id)?;
        validate_prompt(prompt)?;
        self.ensure_workspace(user_id, workspace_id).await?;

        let descriptor = self
            .components
            .connections
            .decrypted_config(workspace_id)
            .await?
            .ok_or_else(|| NlqError::NotFound("Data source not configured".to_string()))?;
        let config = ConnectionConfig::from_json(descriptor.dialect, &descriptor.config)?;

        let request = self
            .components
            .requests
            .create(user_id, workspace_id, prompt)
            .await?;
        info!(
            "Created request {} for workspace {} ({})",
            request.id, workspace_id, config.dialect
        );

        let started = Instant::now();
        match self.run_stages(workspace_id, prompt, &config).await {
            Ok(out) => {
                let stored = self
                    .components
                    .requests
                    .complete(
                        request.id,
                        TerminalUpdate::succeeded(
                            out.sql.clone(),
                            out.result_text.clone(),
                            out.table_json,
                            out.graph_config.clone(),
                        ),
                    )
                    .await;
                if let Err(e) = stored {
                    warn!("Could not store result of request {}: {}", request.id, e);
                    self.mark_failed(request.id, Some(out.sql)).await;
                    return Err(e);
                }
                info!(
                    "Request {} succeeded in {} ms",
                    request.id,
                    started.elapsed().as_millis()
                );
                Ok(DataRequestResult {
                    request_id: request.id,
                    status: RequestStatus::Succeeded,
                    response_id: Some(Uuid::new_v4().to_string()),
                    prompt: None,
                    sql_script: Some(out.sql),
                    result_text: out.result_text,
                    result_table: Some(out.table),
                    graph_config: out.graph_config,
                })
            }
            Err(failure) => {
                warn!("Request {} failed: {}", request.id, failure.error);
                self.mark_failed(request.id, failure.guarded_sql).await;
                Err(failure.error)
            }
        }
    }

    async fn mark_failed(&self, request_id: i64, guarded_sql: Option<String>) {
        if let Err(e) = self
            .components
            .requests
            .complete(request_id, TerminalUpdate::failed(guarded_sql))
            .await
        {
            warn!("Could not mark request {} as failed: {}", request_id, e);
        }
    }

    pub async fn get_one(
        &self,
        user_id: i64,
        workspace_id: i64,
        request_id: i64,
    ) -> Result<DataRequestResult> {
        self.components.limiter.check(workspace_id)?;
        self.ensure_workspace(user_id, workspace_id).await?;
        let request = self
            .components
            .requests
            .find(workspace_id, request_id)
            .await?
            .ok_or_else(|| NlqError::NotFound("Request not found".to_string()))?;
        Ok(DataRequestResult::from_stored(&request, false))
    }

    pub async fn get_latest(&self, user_id: i64, workspace_id: i64) -> Result<DataRequestResult> {
        self.components.limiter.check(workspace_id)?;
        self.ensure_workspace(user_id, workspace_id).await?;
        let request = self
            .components
            .requests
            .latest(workspace_id)
            .await?
            .ok_or_else(|| NlqError::NotFound("No requests yet".to_string()))?;
        Ok(DataRequestResult::from_stored(&request, false))
    }

    /// Newest first, at most fifty, prompts included.
    pub async fn get_all(&self, user_id: i64, workspace_id: i64) -> Result<Vec<DataRequestResult>> {
        self.components.limiter.check(workspace_id)?;
        self.ensure_workspace(user_id, workspace_id).await?;
        let requests = self
            .components
            .requests
            .list(workspace_id, HISTORY_LIMIT)
            .await?;
        Ok(requests
            .iter()
            .map(|r| DataRequestResult::from_stored(r, true))
            .collect())
    }

    async fn ensure_workspace(&self, user_id: i64, workspace_id: i64) -> Result<()> {
        if self
            .components
            .workspaces
            .is_owner(user_id, workspace_id)
            .await?
        {
            Ok(())
        } else {
            Err(NlqError::NotFound("Workspace not found".to_string()))
        }
    }

    async fn run_stages(
        &self,
        workspace_id: i64,
        prompt: &str,
        config: &ConnectionConfig,
    ) -> std::result::Result<StageOutput, StageFailure> {
        let snapshot = self
            .components
            .metadata
            .snapshot(workspace_id)
            .await
            .map_err(|e| StageFailure::new(e, None))?;

        let (candidate, origin) = self.generate_sql(prompt, &snapshot).await;
        debug!("Candidate SQL ({:?}): {}", origin, candidate);

        let opts = GuardOptions {
            allowed_schemas: Some(snapshot.schemas()),
            force_limit: self.settings.force_limit,
            max_rows: self.settings.max_rows,
            max_json_bytes: self.settings.max_bytes,
            forbid_free_joins: self.settings.forbid_free_joins,
            query_timeout: self.settings.query_timeout,
            ..GuardOptions::for_dialect(config.dialect)
        };

        let (sql, rows) = self
            .guard_and_execute(prompt, candidate, &snapshot, &opts, config)
            .await?;

        let processed = self.processor.process(rows, &snapshot);
        let table_json = serde_json::to_value(&processed.table)
            .map_err(|e| StageFailure::new(e, Some(sql.clone())))?;
        let result_text = self.result_text(&processed.rows).await;
        let graph_config = self.graph_config(&processed.rows).await;

        Ok(StageOutput {
            sql,
            table: processed.table,
            table_json,
            result_text,
            graph_config,
        })
    }

    /// Guard and run the candidate. With repair enabled, one rejected or
    /// failed candidate is sent back to the model together with the error.
    async fn guard_and_execute(
        &self,
        prompt: &str,
        mut candidate: String,
        snapshot: &MetadataSnapshot,
        opts: &GuardOptions,
        config: &ConnectionConfig,
    ) -> std::result::Result<(String, Vec<Record>), StageFailure> {
        let max_attempts = if self.settings.sql_repair_enabled { 2 } else { 1 };
        let guard = SqlGuard::new(snapshot);

        let mut attempt = 1;
        loop {
            info!("Execution attempt {} of {}", attempt, max_attempts);
            let error = match guard.validate_and_rewrite(&candidate, opts) {
                Err(violation) => AttemptError::Guard(violation),
                Ok(sql) => match self
                    .components
                    .executor
                    .execute(config, &sql, opts.query_timeout)
                    .await
                {
                    Ok(rows) => return Ok((sql, rows)),
                    Err(e) => AttemptError::Execution(e, sql),
                },
            };

            warn!("Attempt {} failed: {}", attempt, error.feedback());
            if attempt >= max_attempts {
                return Err(error.into_failure());
            }
            match self
                .repair_sql(prompt, &candidate, &error.feedback(), snapshot)
                .await
            {
                Some(repaired) => {
                    debug!("Candidate SQL ({:?}): {}", SqlOrigin::Repair, repaired);
                    candidate = repaired;
                    attempt += 1;
                }
                None => return Err(error.into_failure()),
            }
        }
    }

    /// Model SQL, or the deterministic stub when the model is unavailable
    /// or answers with nothing usable.
    async fn generate_sql(&self, prompt: &str, snapshot: &MetadataSnapshot) -> (String, SqlOrigin) {
        let built = prompts::build_sql_prompt(prompt, &snapshot.tables, &snapshot.foreign_keys);
        match self.complete(built, ResponseFormat::JsonObject).await {
            Ok(raw) => match parse_sql_response(&raw) {
                Some(sql) => return (sql, SqlOrigin::Llm),
                None => warn!("LLM response carried no SQL, using fallback query"),
            },
            Err(e) => warn!("SQL generation failed, using fallback query: {}", e),
        }
        (stub_sql(snapshot), SqlOrigin::Stub)
    }

    async fn repair_sql(
        &self,
        prompt: &str,
        previous_sql: &str,
        feedback: &str,
        snapshot: &MetadataSnapshot,
    ) -> Option<String> {
        let built = prompts::build_sql_repair_prompt(
            prompt,
            previous_sql,
            feedback,
            &snapshot.tables,
            &snapshot.foreign_keys,
        );
        match self.complete(built, ResponseFormat::JsonObject).await {
            Ok(raw) => parse_sql_response(&raw),
            Err(e) => {
                warn!("SQL repair failed: {}", e);
                None
            }
        }
    }

    async fn result_text(&self, rows: &[Record]) -> Option<String> {
        let built = prompts::build_result_text_prompt(rows);
        match self.complete(built, ResponseFormat::Text).await {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Result text generation failed: {}", e);
                None
            }
        }
    }

    async fn graph_config(&self, rows: &[Record]) -> Option<Value> {
        let built = prompts::build_graph_config_prompt(rows);
        let raw = match self.complete(built, ResponseFormat::JsonObject).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Graph config generation failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<Value>(&strip_code_fences(&raw)) {
            Ok(value @ Value::Object(_)) => Some(value),
            Ok(_) => {
                warn!("Graph config is not a JSON object, dropping it");
                None
            }
            Err(e) => {
                warn!("Graph config is not valid JSON: {}", e);
                None
            }
        }
    }

    async fn complete(&self, built: Result<BuiltPrompt>, format: ResponseFormat) -> Result<String> {
        let built = built?;
        self.components
            .llm
            .complete(&built.messages, built.max_tokens, format)
            .await
    }
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(NlqError::InvalidInput("prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(NlqError::InvalidInput(format!(
            "prompt must be at most {} characters",
            MAX_PROMPT_CHARS
        )));
    }
    Ok(())
}
