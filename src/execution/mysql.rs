//! MySQL execution

use crate::connection::{ConnectionConfig, Dialect};
use crate::error::ExecutionError;
use crate::execution::record::{bytes_cell, decode_cell, Cell, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

fn fail(e: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::new(Dialect::Mysql, e.to_string())
}

pub async fn run(
    config: &ConnectionConfig,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Record>, ExecutionError> {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password);

    let mut conn = tokio::time::timeout(timeout, options.connect())
        .await
        .map_err(|_| fail("connection timed out"))?
        .map_err(fail)?;

    let outcome = query(&mut conn, sql, timeout).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close mysql connection: {}", e);
    }
    outcome
}

async fn query(
    conn: &mut MySqlConnection,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Record>, ExecutionError> {
    let set_timeout = format!("SET SESSION MAX_EXECUTION_TIME={}", timeout.as_millis());
    (&mut *conn)
        .execute(set_timeout.as_str())
        .await
        .map_err(fail)?;

    let rows = sqlx::query(sql).fetch_all(&mut *conn).await.map_err(fail)?;
    debug!("MySQL returned {} row(s)", rows.len());
    Ok(rows.iter().map(decode_row).collect())
}

fn decode_row(row: &MySqlRow) -> Record {
    row.columns()
        .iter()
        .map(|col| {
            let i = col.ordinal();
            let cell = match col.type_info().name() {
                "BOOLEAN" => decode_cell(row, i, Cell::Bool),
                "TINYINT" => decode_cell(row, i, |v: i8| Cell::from(i64::from(v))),
                "SMALLINT" => decode_cell(row, i, |v: i16| Cell::from(i64::from(v))),
                "INT" | "MEDIUMINT" => decode_cell(row, i, |v: i32| Cell::from(i64::from(v))),
                "BIGINT" => decode_cell(row, i, |v: i64| Cell::from(v)),
                "TINYINT UNSIGNED" => decode_cell(row, i, |v: u8| Cell::from(i64::from(v))),
                "SMALLINT UNSIGNED" => decode_cell(row, i, |v: u16| Cell::from(i64::from(v))),
                "INT UNSIGNED" | "MEDIUMINT UNSIGNED" => {
                    decode_cell(row, i, |v: u32| Cell::from(i64::from(v)))
                }
                "BIGINT UNSIGNED" => decode_cell(row, i, |v: u64| Cell::Number(v.into())),
                "YEAR" => decode_cell(row, i, |v: u16| Cell::from(i64::from(v))),
                "FLOAT" => decode_cell(row, i, |v: f32| Cell::float(f64::from(v))),
                "DOUBLE" => decode_cell(row, i, Cell::float),
                "DECIMAL" => decode_cell(row, i, |v: Decimal| Cell::Text(v.to_string())),
                "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
                | "SET" => decode_cell(row, i, Cell::Text),
                "DATE" => decode_cell(row, i, |v: NaiveDate| Cell::Date(v)),
                "DATETIME" => decode_cell(row, i, |v: NaiveDateTime| Cell::NaiveDateTime(v)),
                "TIMESTAMP" => decode_cell(row, i, |v: DateTime<Utc>| Cell::DateTime(v)),
                "TIME" => decode_cell(row, i, |v: NaiveTime| Cell::Time(v)),
                "JSON" => decode_cell(row, i, |v: Value| Cell::Json(v)),
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    decode_cell(row, i, bytes_cell)
                }
                _ => decode_cell(row, i, Cell::Text),
            };
            (col.name().to_string(), cell)
        })
        .collect()
}
