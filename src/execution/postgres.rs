//! PostgreSQL execution

use crate::connection::{ConnectionConfig, Dialect};
use crate::error::ExecutionError;
use crate::execution::record::{bytes_cell, decode_cell, Cell, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

fn fail(e: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::new(Dialect::Postgres, e.to_string())
}

pub async fn run(
    config: &ConnectionConfig,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Record>, ExecutionError> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password)
        .ssl_mode(if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        });

    let mut conn = tokio::time::timeout(timeout, options.connect())
        .await
        .map_err(|_| fail("connection timed out"))?
        .map_err(fail)?;

    let outcome = query(&mut conn, sql, timeout).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close postgres connection: {}", e);
    }
    outcome
}

async fn query(
    conn: &mut PgConnection,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Record>, ExecutionError> {
    let set_timeout = format!("SET statement_timeout TO {}", timeout.as_millis());
    (&mut *conn)
        .execute(set_timeout.as_str())
        .await
        .map_err(fail)?;

    let rows = sqlx::query(sql).fetch_all(&mut *conn).await.map_err(fail)?;
    debug!("Postgres returned {} row(s)", rows.len());
    Ok(rows.iter().map(decode_row).collect())
}

fn decode_row(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|col| {
            let i = col.ordinal();
            let cell = match col.type_info().name() {
                "BOOL" => decode_cell(row, i, Cell::Bool),
                "INT2" => decode_cell(row, i, |v: i16| Cell::from(i64::from(v))),
                "INT4" => decode_cell(row, i, |v: i32| Cell::from(i64::from(v))),
                "INT8" => decode_cell(row, i, |v: i64| Cell::from(v)),
                "FLOAT4" => decode_cell(row, i, |v: f32| Cell::float(f64::from(v))),
                "FLOAT8" => decode_cell(row, i, Cell::float),
                "NUMERIC" => decode_cell(row, i, |v: Decimal| Cell::Text(v.to_string())),
                "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
                    decode_cell(row, i, Cell::Text)
                }
                "UUID" => decode_cell(row, i, |v: uuid::Uuid| Cell::Text(v.to_string())),
                "DATE" => decode_cell(row, i, |v: NaiveDate| Cell::Date(v)),
                "TIMESTAMP" => decode_cell(row, i, |v: NaiveDateTime| Cell::NaiveDateTime(v)),
                "TIMESTAMPTZ" => decode_cell(row, i, |v: DateTime<Utc>| Cell::DateTime(v)),
                "TIME" => decode_cell(row, i, |v: NaiveTime| Cell::Time(v)),
                "JSON" | "JSONB" => decode_cell(row, i, |v: Value| Cell::Json(v)),
                "BYTEA" => decode_cell(row, i, bytes_cell),
                _ => decode_cell(row, i, Cell::Text),
            };
            (col.name().to_string(), cell)
        })
        .collect()
}
