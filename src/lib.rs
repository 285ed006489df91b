pub mod config;
pub mod connection;
pub mod error;
pub mod execution;
pub mod guard;
pub mod llm;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod rate_limit;
pub mod request;
pub mod result;

// Database module for PostgreSQL
pub mod db;

pub use config::{AppConfig, LlmSettings};
pub use connection::{ConnectionConfig, Dialect};
pub use error::{ErrorKind, ExecutionError, GuardViolation, NlqError, Result};
pub use execution::{Cell, QueryExecutor, Record, SqlxExecutor};
pub use guard::{GuardOptions, SqlGuard};
pub use llm::{ChatMessage, LlmClient, LlmProvider, ResponseFormat};
pub use metadata::{ColumnRef, DataColumn, DataTable, ForeignKey, MetadataSnapshot};
pub use pipeline::{DataRequestResult, PipelineComponents, PipelineSettings, QueryPipeline};
pub use providers::{
    ConnectionConfigProvider, DataSourceDescriptor, MetadataProvider, StaticWorkspace,
    WorkspaceDirectory,
};
pub use rate_limit::WorkspaceRateLimiter;
pub use request::{InMemoryRequestStore, Request, RequestStatus, RequestStore};
pub use result::{ColumnarTable, ResultProcessor};
