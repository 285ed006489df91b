//! Request records and their persistence contract.

use crate::error::{NlqError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Succeeded => "SUCCEEDED",
            RequestStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "SUCCEEDED" => Ok(RequestStatus::Succeeded),
            "FAILED" => Ok(RequestStatus::Failed),
            other => Err(NlqError::Database(format!("Unknown request status: {}", other))),
        }
    }
}

/// One natural-language question and what came of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: i64,
    pub user_id: i64,
    pub workspace_id: i64,
    pub prompt: String,
    pub status: RequestStatus,
    pub sql_script: Option<String>,
    pub result_text: Option<String>,
    /// Persisted columnar table, as JSON.
    pub result_table: Option<Value>,
    pub graph_config: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single write that moves a request out of PENDING.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: RequestStatus,
    pub sql_script: Option<String>,
    pub result_text: Option<String>,
    pub result_table: Option<Value>,
    pub graph_config: Option<Value>,
}

impl TerminalUpdate {
    pub fn succeeded(
        sql_script: String,
        result_text: Option<String>,
        result_table: Value,
        graph_config: Option<Value>,
    ) -> Self {
        Self {
            status: RequestStatus::Succeeded,
            sql_script: Some(sql_script),
            result_text,
            result_table: Some(result_table),
            graph_config,
        }
    }

    /// A failed request keeps at most the SQL that passed the guard.
    pub fn failed(sql_script: Option<String>) -> Self {
        Self {
            status: RequestStatus::Failed,
            sql_script,
            result_text: None,
            result_table: None,
            graph_config: None,
        }
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new PENDING request.
    async fn create(&self, user_id: i64, workspace_id: i64, prompt: &str) -> Result<Request>;

    /// Apply the terminal update. Fails if the request is not PENDING.
    async fn complete(&self, id: i64, update: TerminalUpdate) -> Result<()>;

    async fn find(&self, workspace_id: i64, id: i64) -> Result<Option<Request>>;

    async fn latest(&self, workspace_id: i64) -> Result<Option<Request>>;

    /// Newest first.
    async fn list(&self, workspace_id: i64, limit: usize) -> Result<Vec<Request>>;
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: Mutex<Vec<Request>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Request>>> {
        self.requests
            .lock()
            .map_err(|_| NlqError::Database("request store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, user_id: i64, workspace_id: i64, prompt: &str) -> Result<Request> {
        let mut requests = self.lock()?;
        let now = Utc::now();
        let request = Request {
            id: requests.len() as i64 + 1,
            user_id,
            workspace_id,
            prompt: prompt.to_string(),
            status: RequestStatus::Pending,
            sql_script: None,
            result_text: None,
            result_table: None,
            graph_config: None,
            created_at: now,
            updated_at: now,
        };
        requests.push(request.clone());
        Ok(request)
    }

    async fn complete(&self, id: i64, update: TerminalUpdate) -> Result<()> {
        let mut requests = self.lock()?;
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| NlqError::NotFound("Request not found".to_string()))?;

        if request.status != RequestStatus::Pending {
            return Err(NlqError::Database(format!(
                "Request {} is already {}",
                id, request.status
            )));
        }

        request.status = update.status;
        request.sql_script = update.sql_script;
        request.result_text = update.result_text;
        request.result_table = update.result_table;
        request.graph_config = update.graph_config;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn find(&self, workspace_id: i64, id: i64) -> Result<Option<Request>> {
        Ok(self
            .lock()?
            .iter()
            .find(|r| r.id == id && r.workspace_id == workspace_id)
            .cloned())
    }

    async fn latest(&self, workspace_id: i64) -> Result<Option<Request>> {
        Ok(self
            .lock()?
            .iter()
            .rev()
            .find(|r| r.workspace_id == workspace_id)
            .cloned())
    }

    async fn list(&self, workspace_id: i64, limit: usize) -> Result<Vec<Request>> {
        Ok(self
            .lock()?
            .iter()
            .rev()
            .filter(|r| r.workspace_id == workspace_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
