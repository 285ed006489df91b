use crate::connection::Dialect;
use thiserror::Error;

/// A candidate SQL string was rejected by the guard.
///
/// Messages name only keywords and schemas, so they are safe to show to
/// end users verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("Only SELECT queries are allowed")]
    NotSelect,

    #[error("CTE (WITH) is not allowed")]
    CteNotAllowed,

    #[error("Keyword not allowed: {0}")]
    ForbiddenKeyword(String),

    #[error("Keyword not allowed: {0}")]
    DangerousKeyword(String),

    #[error("Multiple statements are not allowed")]
    MultipleStatements,

    #[error("Access to schemas not allowed: {}", .0.join(", "))]
    SchemaNotAllowed(Vec<String>),

    #[error("JOINs must use qualified column names and match declared FKs")]
    UnqualifiedJoin,

    #[error("JOINs must follow foreign key relationships for safety")]
    UnauthorizedJoin { left: String, right: String },
}

/// The engine refused or failed to run a query that passed the guard.
#[derive(Error, Debug, Clone)]
#[error("{dialect} query failed: {message}")]
pub struct ExecutionError {
    pub dialect: Dialect,
    pub message: String,
}

impl ExecutionError {
    pub fn new(dialect: Dialect, message: impl Into<String>) -> Self {
        Self {
            dialect,
            message: message.into(),
        }
    }

    /// Raw engine message, meant for the repair prompt rather than end users.
    pub fn engine_message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Guard(#[from] GuardViolation),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rate limit exceeded for this workspace")]
    RateLimited { workspace_id: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NlqError>;

/// How an error is surfaced to callers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl NlqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NlqError::NotFound(_) => ErrorKind::NotFound,
            NlqError::Guard(_) | NlqError::RateLimited { .. } | NlqError::InvalidInput(_) => {
                ErrorKind::BadRequest
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Message that may be returned to an end user.
    pub fn user_message(&self) -> String {
        match self {
            NlqError::NotFound(_)
            | NlqError::Guard(_)
            | NlqError::RateLimited { .. }
            | NlqError::InvalidInput(_) => self.to_string(),
            NlqError::Execution(_) => "Query execution failed".to_string(),
            _ => "Internal error".to_string(),
        }
    }
}

impl From<sqlx::Error> for NlqError {
    fn from(e: sqlx::Error) -> Self {
        NlqError::Database(e.to_string())
    }
}
