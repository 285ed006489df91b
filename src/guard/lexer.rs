//! Lexical checks over raw SQL text: comments, statement shape, keyword
//! policy and limit detection. No grammar is involved; a keyword counts
//! wherever it appears as a whole word.

use crate::error::GuardViolation;
use regex::Regex;

/// DDL/DML and maintenance statements.
pub const FORBIDDEN_KEYWORDS: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REINDEX", "ANALYZE",
    "VACUUM",
];

/// Procedure calls, bulk IO and privilege changes.
pub const DANGEROUS_KEYWORDS: [&str; 5] = ["EXEC", "CALL", "COPY", "GRANT", "REVOKE"];

lazy_static::lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"--[^\n]*").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref LEADING_WORD: Regex = Regex::new(r"^\s*([A-Za-z_]+)").unwrap();
    static ref WITH_CLAUSE: Regex = Regex::new(r"(?i)\bWITH\b").unwrap();
    static ref LIMIT_KEYWORD: Regex = Regex::new(r"(?i)\bLIMIT\b").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref FORBIDDEN: Vec<(&'static str, Regex)> = keyword_patterns(&FORBIDDEN_KEYWORDS);
    static ref DANGEROUS: Vec<(&'static str, Regex)> = keyword_patterns(&DANGEROUS_KEYWORDS);
}

fn keyword_patterns(keywords: &[&'static str]) -> Vec<(&'static str, Regex)> {
    keywords
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"(?i)\b{}\b", kw)).unwrap()))
        .collect()
}

/// Remove `--` line comments, then `/* */` block comments.
pub fn strip_comments(sql: &str) -> String {
    let without_lines = LINE_COMMENT.replace_all(sql, "");
    BLOCK_COMMENT.replace_all(&without_lines, "").into_owned()
}

/// The statement must open with SELECT. A leading WITH passes here so the
/// keyword scan can reject it with the CTE message.
pub fn ensure_select(sql: &str) -> Result<(), GuardViolation> {
    let first = LEADING_WORD
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase());

    match first.as_deref() {
        Some("SELECT") | Some("WITH") => Ok(()),
        _ => Err(GuardViolation::NotSelect),
    }
}

pub fn ensure_no_cte_or_writes(sql: &str) -> Result<(), GuardViolation> {
    if WITH_CLAUSE.is_match(sql) {
        return Err(GuardViolation::CteNotAllowed);
    }
    for (kw, re) in FORBIDDEN.iter() {
        if re.is_match(sql) {
            return Err(GuardViolation::ForbiddenKeyword(kw.to_string()));
        }
    }
    Ok(())
}

pub fn ensure_no_dangerous_keywords(sql: &str) -> Result<(), GuardViolation> {
    for (kw, re) in DANGEROUS.iter() {
        if re.is_match(sql) {
            return Err(GuardViolation::DangerousKeyword(kw.to_string()));
        }
    }
    Ok(())
}

/// Statement text without surrounding whitespace and trailing semicolons.
pub fn statement_body(sql: &str) -> &str {
    let mut body = sql.trim();
    while let Some(stripped) = body.strip_suffix(';') {
        body = stripped.trim_end();
    }
    body
}

/// Rejects any `;` left after trailing semicolons are trimmed. Literals are
/// not parsed, so `WHERE note = 'a;b'` is rejected too.
pub fn ensure_single_statement(sql: &str) -> Result<(), GuardViolation> {
    if statement_body(sql).contains(';') {
        return Err(GuardViolation::MultipleStatements);
    }
    Ok(())
}

/// Any whole-word LIMIT, including one inside a subquery.
pub fn has_limit(sql: &str) -> bool {
    LIMIT_KEYWORD.is_match(sql)
}

pub fn normalize_whitespace(sql: &str) -> String {
    WHITESPACE.replace_all(sql.trim(), " ").into_owned()
}
