//! SQL Guard
//!
//! Decides from text alone whether a candidate statement is a read-only,
//! schema-bounded, FK-bounded SELECT, and returns a rewrite that always
//! carries a row limit. Checks run in a fixed order and stop at the first
//! violation; no partial rewrite is ever returned.

pub mod lexer;
pub mod references;

use crate::connection::Dialect;
use crate::error::GuardViolation;
use crate::metadata::MetadataSnapshot;
use itertools::Itertools;
use references::{AliasMap, Equality, TableRef};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Per-call guard and result-budget settings.
#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub dialect: Dialect,
    /// `None` disables the schema allowlist.
    pub allowed_schemas: Option<BTreeSet<String>>,
    pub force_limit: u64,
    pub max_rows: usize,
    pub max_json_bytes: usize,
    pub forbid_free_joins: bool,
    pub query_timeout: Duration,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            allowed_schemas: None,
            force_limit: 101,
            max_rows: 100,
            max_json_bytes: 200 * 1024,
            forbid_free_joins: true,
            query_timeout: Duration::from_millis(10_000),
        }
    }
}

impl GuardOptions {
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_allowed_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_schemas = Some(schemas.into_iter().map(Into::into).collect());
        self
    }
}

/// Validates candidate SQL against one workspace's metadata snapshot.
pub struct SqlGuard<'a> {
    metadata: &'a MetadataSnapshot,
}

impl<'a> SqlGuard<'a> {
    pub fn new(metadata: &'a MetadataSnapshot) -> Self {
        Self { metadata }
    }

    /// Validate `sql` and return the text to execute.
    ///
    /// Text that already contains a whole-word `LIMIT` comes back exactly as
    /// it was after comment stripping, even when that LIMIT sits inside a
    /// subquery. Anything else gets ` LIMIT <force_limit>` appended to the
    /// trimmed statement.
    pub fn validate_and_rewrite(
        &self,
        sql: &str,
        opts: &GuardOptions,
    ) -> Result<String, GuardViolation> {
        let sanitized = lexer::strip_comments(sql);

        lexer::ensure_select(&sanitized)?;
        lexer::ensure_no_cte_or_writes(&sanitized)?;
        lexer::ensure_no_dangerous_keywords(&sanitized)?;
        lexer::ensure_single_statement(&sanitized)?;

        let normalized = lexer::normalize_whitespace(&sanitized);
        let refs = references::extract_table_refs(&normalized, opts.dialect);
        debug!("Guard found {} table reference(s)", refs.len());

        if let Some(allowed) = &opts.allowed_schemas {
            check_schemas(&refs, allowed)?;
        }

        if opts.forbid_free_joins {
            let aliases = AliasMap::from_refs(&refs);
            self.check_joins(&normalized, &aliases)?;
        }

        if lexer::has_limit(&sanitized) {
            return Ok(sanitized);
        }
        Ok(format!(
            "{} LIMIT {}",
            lexer::statement_body(&sanitized),
            opts.force_limit
        ))
    }

    fn check_joins(&self, normalized: &str, aliases: &AliasMap) -> Result<(), GuardViolation> {
        for clause in references::extract_join_clauses(normalized) {
            let equalities = clause
                .predicate
                .as_deref()
                .map(references::extract_equalities)
                .unwrap_or_default();

            if equalities.is_empty() {
                return Err(GuardViolation::UnauthorizedJoin {
                    left: clause.target,
                    right: "(no join condition)".to_string(),
                });
            }

            for eq in &equalities {
                self.check_equality(eq, aliases)?;
            }
        }
        Ok(())
    }

    fn check_equality(&self, eq: &Equality, aliases: &AliasMap) -> Result<(), GuardViolation> {
        if eq.left.len() < 2 || eq.right.len() < 2 {
            return Err(GuardViolation::UnqualifiedJoin);
        }

        let unauthorized = || GuardViolation::UnauthorizedJoin {
            left: Equality::text(&eq.left),
            right: Equality::text(&eq.right),
        };

        let left = references::resolve_column(&eq.left, aliases).ok_or_else(unauthorized)?;
        let right = references::resolve_column(&eq.right, aliases).ok_or_else(unauthorized)?;

        if !self.metadata.is_declared_join(&left, &right) {
            debug!("Rejected join {} = {}", left, right);
            return Err(unauthorized());
        }
        Ok(())
    }
}

/// Every referenced schema must be allowed (case-insensitive). Offenders are
/// reported as written, first occurrence only.
fn check_schemas(refs: &[TableRef], allowed: &BTreeSet<String>) -> Result<(), GuardViolation> {
    let allowed_lower: BTreeSet<String> = allowed.iter().map(|s| s.to_ascii_lowercase()).collect();

    let offending: Vec<String> = refs
        .iter()
        .filter_map(|r| r.schema.as_deref())
        .filter(|schema| !allowed_lower.contains(&schema.to_ascii_lowercase()))
        .unique_by(|schema| schema.to_ascii_lowercase())
        .map(str::to_string)
        .collect();

    if offending.is_empty() {
        Ok(())
    } else {
        Err(GuardViolation::SchemaNotAllowed(offending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnRef, ForeignKey};

    fn snapshot_with_fk() -> MetadataSnapshot {
        MetadataSnapshot::new(
            1,
            vec![],
            vec![ForeignKey {
                constraint_name: Some("orders_customer_fk".into()),
                from: ColumnRef::new("public", "orders", "customer_id"),
                to: ColumnRef::new("public", "customers", "id"),
            }],
        )
    }

    fn pg_opts() -> GuardOptions {
        GuardOptions::for_dialect(Dialect::Postgres).with_allowed_schemas(["public"])
    }

    #[test]
    fn test_declared_join_gets_limit() {
        let meta = snapshot_with_fk();
        let guard = SqlGuard::new(&meta);
        let sql = "SELECT * FROM public.orders o JOIN public.customers c ON o.customer_id = c.id";
        let out = guard.validate_and_rewrite(sql, &pg_opts()).unwrap();
        assert_eq!(out, format!("{} LIMIT 101", sql));
    }

    #[test]
    fn test_undeclared_join_rejected() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let sql = "SELECT * FROM public.orders o JOIN public.customers c ON o.customer_id = c.id";
        let err = guard.validate_and_rewrite(sql, &pg_opts()).unwrap_err();
        assert!(matches!(err, GuardViolation::UnauthorizedJoin { .. }));
    }

    #[test]
    fn test_existing_limit_kept_verbatim() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let sql = "SELECT id FROM orders ORDER BY id LIMIT 5";
        assert_eq!(guard.validate_and_rewrite(sql, &pg_opts()).unwrap(), sql);
    }

    #[test]
    fn test_trailing_semicolon_before_limit() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let out = guard
            .validate_and_rewrite("SELECT id FROM orders;\n", &pg_opts())
            .unwrap();
        assert_eq!(out, "SELECT id FROM orders LIMIT 101");
    }

    #[test]
    fn test_comment_cannot_hide_limit_suffix() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let out = guard
            .validate_and_rewrite("SELECT id FROM orders -- top rows", &pg_opts())
            .unwrap();
        assert_eq!(out, "SELECT id FROM orders LIMIT 101");
    }

    #[test]
    fn test_unqualified_pg_table_defaults_to_public() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let opts = GuardOptions::for_dialect(Dialect::Postgres).with_allowed_schemas(["sales"]);
        let err = guard.validate_and_rewrite("SELECT * FROM orders", &opts).unwrap_err();
        assert_eq!(err, GuardViolation::SchemaNotAllowed(vec!["public".into()]));
    }

    #[test]
    fn test_unqualified_mysql_table_passes_allowlist() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let opts = GuardOptions::for_dialect(Dialect::Mysql).with_allowed_schemas(["shop"]);
        assert!(guard.validate_and_rewrite("SELECT * FROM orders", &opts).is_ok());
    }

    #[test]
    fn test_schema_errors_list_each_offender_once() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let opts = GuardOptions {
            forbid_free_joins: false,
            ..pg_opts()
        };
        let sql = "SELECT * FROM hr.staff s JOIN HR.roles r ON s.role_id = r.id JOIN finance.pay p ON p.staff_id = s.id";
        let err = guard.validate_and_rewrite(sql, &opts).unwrap_err();
        assert_eq!(
            err,
            GuardViolation::SchemaNotAllowed(vec!["hr".into(), "finance".into()])
        );
    }

    #[test]
    fn test_join_without_condition_rejected() {
        let meta = snapshot_with_fk();
        let guard = SqlGuard::new(&meta);
        let err = guard
            .validate_and_rewrite("SELECT * FROM orders CROSS JOIN customers", &pg_opts())
            .unwrap_err();
        assert!(matches!(err, GuardViolation::UnauthorizedJoin { .. }));
    }

    #[test]
    fn test_unqualified_join_column_rejected() {
        let meta = snapshot_with_fk();
        let guard = SqlGuard::new(&meta);
        let err = guard
            .validate_and_rewrite(
                "SELECT * FROM orders o JOIN customers c ON customer_id = c.id",
                &pg_opts(),
            )
            .unwrap_err();
        assert_eq!(err, GuardViolation::UnqualifiedJoin);
    }

    #[test]
    fn test_free_joins_allowed_when_policy_off() {
        let meta = MetadataSnapshot::default();
        let guard = SqlGuard::new(&meta);
        let opts = GuardOptions {
            forbid_free_joins: false,
            ..pg_opts()
        };
        assert!(guard
            .validate_and_rewrite("SELECT * FROM a JOIN b ON a.x = b.y", &opts)
            .is_ok());
    }

    #[test]
    fn test_compound_predicate_checks_every_equality() {
        let meta = snapshot_with_fk();
        let guard = SqlGuard::new(&meta);
        let sql = "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id AND o.region = c.region";
        let err = guard.validate_and_rewrite(sql, &pg_opts()).unwrap_err();
        assert_eq!(
            err,
            GuardViolation::UnauthorizedJoin {
                left: "o.region".into(),
                right: "c.region".into()
            }
        );
    }
}
