//! Postgres-backed request store (`user_requests`).

use crate::error::{NlqError, Result};
use crate::request::{Request, RequestStatus, RequestStore, TerminalUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const COLUMNS: &str = "id, user_id, workspace_id, prompt, status, sql_script, result_text, \
                       result_table, graph_config, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    user_id: i64,
    workspace_id: i64,
    prompt: String,
    status: String,
    sql_script: Option<String>,
    result_text: Option<String>,
    result_table: Option<serde_json::Value>,
    graph_config: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = NlqError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Request {
            id: row.id,
            user_id: row.user_id,
            workspace_id: row.workspace_id,
            prompt: row.prompt,
            status: row.status.parse::<RequestStatus>()?,
            sql_script: row.sql_script,
            result_text: row.result_text,
            result_table: row.result_table,
            graph_config: row.graph_config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn create(&self, user_id: i64, workspace_id: i64, prompt: &str) -> Result<Request> {
        let sql = format!(
            "INSERT INTO user_requests (user_id, workspace_id, prompt, status) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            COLUMNS
        );
        let row: RequestRow = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(workspace_id)
            .bind(prompt)
            .bind(RequestStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| NlqError::Database(format!("Failed to create request: {}", e)))?;
        row.try_into()
    }

    async fn complete(&self, id: i64, update: TerminalUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_requests \
             SET status = $1, sql_script = $2, result_text = $3, result_table = $4, \
                 graph_config = $5, updated_at = NOW() \
             WHERE id = $6 AND status = 'PENDING'",
        )
        .bind(update.status.as_str())
        .bind(update.sql_script)
        .bind(update.result_text)
        .bind(update.result_table)
        .bind(update.graph_config)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| NlqError::Database(format!("Failed to update request {}: {}", id, e)))?;

        if result.rows_affected() == 0 {
            return Err(NlqError::Database(format!(
                "Request {} is missing or already completed",
                id
            )));
        }
        Ok(())
    }

    async fn find(&self, workspace_id: i64, id: i64) -> Result<Option<Request>> {
        let sql = format!(
            "SELECT {} FROM user_requests WHERE id = $1 AND workspace_id = $2",
            COLUMNS
        );
        let row: Option<RequestRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Request::try_from).transpose()
    }

    async fn latest(&self, workspace_id: i64) -> Result<Option<Request>> {
        Ok(self.list(workspace_id, 1).await?.into_iter().next())
    }

    async fn list(&self, workspace_id: i64, limit: usize) -> Result<Vec<Request>> {
        let sql = format!(
            "SELECT {} FROM user_requests WHERE workspace_id = $1 ORDER BY id DESC LIMIT $2",
            COLUMNS
        );
        let rows: Vec<RequestRow> = sqlx::query_as(&sql)
            .bind(workspace_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Request::try_from).collect()
    }
}
