//! Execution Adapter
//!
//! Runs one guarded SQL string against a tenant database under a session
//! timeout. Each call opens its own connection and always closes it, on
//! success and on failure.

pub mod mysql;
pub mod postgres;
pub mod record;

pub use record::{Cell, Record};

use crate::connection::{ConnectionConfig, Dialect};
use crate::error::ExecutionError;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::info;

/// Executes already-validated SQL.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        timeout: Duration,
    ) -> Result<Vec<Record>, ExecutionError>;
}

/// Executor backed by sqlx, one short-lived connection per query.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxExecutor;

#[async_trait]
impl QueryExecutor for SqlxExecutor {
    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        timeout: Duration,
    ) -> Result<Vec<Record>, ExecutionError> {
        let started = Instant::now();
        let rows = match config.dialect {
            Dialect::Postgres => postgres::run(config, sql, timeout).await?,
            Dialect::Mysql => mysql::run(config, sql, timeout).await?,
        };
        info!(
            "Executed query on {} ({} rows, {} ms)",
            config.dialect,
            rows.len(),
            started.elapsed().as_millis()
        );
        Ok(rows)
    }
}
