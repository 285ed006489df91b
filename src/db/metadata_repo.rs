//! Metadata repository for PostgreSQL operations
//!
//! Reads the latest ingested snapshot of one workspace and answers
//! workspace-ownership checks.

use crate::error::{NlqError, Result};
use crate::metadata::{ColumnRef, DataColumn, DataTable, ForeignKey, MetadataSnapshot};
use crate::providers::{MetadataProvider, WorkspaceDirectory};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

#[derive(sqlx::FromRow)]
struct TableRow {
    id: i64,
    schema_name: String,
    table_name: String,
    business_name: Option<String>,
    description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_id: i64,
    column_name: String,
    data_type: String,
    is_nullable: bool,
    is_primary_key: bool,
    business_name: Option<String>,
    description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyRow {
    constraint_name: Option<String>,
    from_schema: String,
    from_table: String,
    from_column: String,
    to_schema: String,
    to_table: String,
    to_column: String,
}

pub struct MetadataRepository {
    pool: PgPool,
}

impl MetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load tables (with columns) and foreign keys of one workspace.
    pub async fn load_snapshot(&self, workspace_id: i64) -> Result<MetadataSnapshot> {
        let tables = self.load_tables(workspace_id).await?;
        let foreign_keys = self.load_foreign_keys(workspace_id).await?;
        debug!(
            "Loaded metadata for workspace {}: {} tables, {} foreign keys",
            workspace_id,
            tables.len(),
            foreign_keys.len()
        );
        Ok(MetadataSnapshot::new(workspace_id, tables, foreign_keys))
    }

    async fn load_tables(&self, workspace_id: i64) -> Result<Vec<DataTable>> {
        let tables: Vec<TableRow> = sqlx::query_as(
            r#"
            SELECT id, schema_name, table_name, business_name, description
            FROM data_tables
            WHERE workspace_id = $1
            ORDER BY id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NlqError::Database(format!("Failed to load tables: {}", e)))?;

        let columns: Vec<ColumnRow> = sqlx::query_as(
            r#"
            SELECT c.table_id, c.column_name, c.data_type, c.is_nullable, c.is_primary_key,
                   c.business_name, c.description
            FROM data_columns c
            JOIN data_tables t ON t.id = c.table_id
            WHERE t.workspace_id = $1
            ORDER BY c.table_id, c.id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NlqError::Database(format!("Failed to load columns: {}", e)))?;

        let mut by_table: HashMap<i64, Vec<DataColumn>> = HashMap::new();
        for c in columns {
            by_table.entry(c.table_id).or_default().push(DataColumn {
                column_name: c.column_name,
                data_type: c.data_type,
                is_nullable: c.is_nullable,
                is_primary_key: c.is_primary_key,
                business_name: c.business_name,
                description: c.description,
            });
        }

        Ok(tables
            .into_iter()
            .map(|t| DataTable {
                columns: by_table.remove(&t.id).unwrap_or_default(),
                schema_name: t.schema_name,
                table_name: t.table_name,
                business_name: t.business_name,
                description: t.description,
            })
            .collect())
    }

    async fn load_foreign_keys(&self, workspace_id: i64) -> Result<Vec<ForeignKey>> {
        let rows: Vec<ForeignKeyRow> = sqlx::query_as(
            r#"
            SELECT fk.constraint_name,
                   ft.schema_name AS from_schema, ft.table_name AS from_table, fk.from_column,
                   tt.schema_name AS to_schema, tt.table_name AS to_table, fk.to_column
            FROM foreign_keys fk
            JOIN data_tables ft ON ft.id = fk.from_table_id
            JOIN data_tables tt ON tt.id = fk.to_table_id
            WHERE ft.workspace_id = $1
            ORDER BY fk.id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NlqError::Database(format!("Failed to load foreign keys: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|r| ForeignKey {
                constraint_name: r.constraint_name,
                from: ColumnRef::new(r.from_schema, r.from_table, r.from_column),
                to: ColumnRef::new(r.to_schema, r.to_table, r.to_column),
            })
            .collect())
    }

    /// Persist business names produced by the naming stage.
    pub async fn save_business_names(&self, snapshot: &MetadataSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in &snapshot.tables {
            sqlx::query(
                "UPDATE data_tables SET business_name = $1, description = $2 \
                 WHERE workspace_id = $3 AND schema_name = $4 AND table_name = $5",
            )
            .bind(&table.business_name)
            .bind(&table.description)
            .bind(snapshot.workspace_id)
            .bind(&table.schema_name)
            .bind(&table.table_name)
            .execute(&mut *tx)
            .await?;

            for column in &table.columns {
                sqlx::query(
                    "UPDATE data_columns c SET business_name = $1, description = $2 \
                     FROM data_tables t \
                     WHERE c.table_id = t.id AND t.workspace_id = $3 \
                       AND t.schema_name = $4 AND t.table_name = $5 AND c.column_name = $6",
                )
                .bind(&column.business_name)
                .bind(&column.description)
                .bind(snapshot.workspace_id)
                .bind(&table.schema_name)
                .bind(&table.table_name)
                .bind(&column.column_name)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for MetadataRepository {
    async fn snapshot(&self, workspace_id: i64) -> Result<MetadataSnapshot> {
        self.load_snapshot(workspace_id).await
    }
}

#[async_trait]
impl WorkspaceDirectory for MetadataRepository {
    async fn is_owner(&self, user_id: i64, workspace_id: i64) -> Result<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM workspaces WHERE id = $1 AND owner_id = $2")
                .bind(workspace_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}
