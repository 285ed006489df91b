//! Table, alias and join-predicate extraction.
//!
//! What counts as a table reference is exactly what these patterns find:
//! `FROM <item>[, <item>...]` and `JOIN <item>` over whitespace-normalized
//! text, where an item is `[ONLY|LATERAL] <[schema.]table> [AS] alias`, a
//! table function call, or a parenthesized derived table. A FROM list runs
//! until a clause keyword or a closing paren at its own level; joins and
//! table options between its items are stepped over. The `FROM` inside
//! `EXTRACT(..)`, `SUBSTRING(..)`, `TRIM(..)`, `OVERLAY(..)` and
//! `IS DISTINCT FROM` is not a table reference.

use crate::connection::Dialect;
use crate::metadata::ResolvedColumn;
use regex::Regex;
use std::collections::HashMap;

const IDENT: &str = r#"(?:[A-Za-z_][\w$]*|"[^"]+"|`[^`]+`)"#;

/// Calls whose argument list may contain a `FROM`.
const FROM_FUNCTIONS: [&str; 4] = ["EXTRACT", "SUBSTRING", "TRIM", "OVERLAY"];

/// Keywords that close a FROM list at its own nesting level.
const FROM_LIST_END: [&str; 14] = [
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "FETCH", "FOR", "INTO", "LOCK",
];

/// Words that can follow a table name without being its alias.
const RESERVED: [&str; 38] = [
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL", "ON", "USING",
    "GROUP", "ORDER", "BY", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT", "WINDOW",
    "FETCH", "FOR", "AS", "SELECT", "FROM", "AND", "OR", "NOT", "STRAIGHT_JOIN", "LATERAL",
    "TABLESAMPLE", "USE", "FORCE", "IGNORE", "PARTITION", "WITH", "LOCK",
];

lazy_static::lazy_static! {
    static ref REF_KEYWORD: Regex = Regex::new(r"(?i)\b(FROM|JOIN)\s+").unwrap();
    static ref REF_NAME: Regex = Regex::new(&format!(
        r"^({id})(?:\s*\.\s*({id}))?",
        id = IDENT
    ))
    .unwrap();
    static ref REF_ALIAS: Regex = Regex::new(&format!(r"(?i)^\s*(?:AS\s+)?({id})", id = IDENT)).unwrap();
    static ref REF_MODIFIER: Regex = Regex::new(r"(?i)^(?:ONLY|LATERAL)\b\s*").unwrap();
    static ref JOIN_KEYWORD: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref ON_KEYWORD: Regex = Regex::new(r"(?i)\bON\b").unwrap();
    static ref PREDICATE_END: Regex = Regex::new(
        r"(?i)\b(WHERE|GROUP|ORDER|HAVING|LIMIT|OFFSET|UNION|INTERSECT|EXCEPT|WINDOW|FETCH|LEFT|RIGHT|INNER|FULL|CROSS|NATURAL|OUTER|STRAIGHT_JOIN)\b"
    )
    .unwrap();
    static ref EQUALITY: Regex = Regex::new(&format!(
        r"({id}(?:\s*\.\s*{id}){{0,2}})\s*=\s*({id}(?:\s*\.\s*{id}){{0,2}})",
        id = IDENT
    ))
    .unwrap();
}

/// One `FROM`/`JOIN` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Explicit schema, or the dialect default when one exists.
    pub schema: Option<String>,
    pub table: String,
    /// Explicit alias, or the bare table name.
    pub alias: String,
}

impl TableRef {
    fn same_table(&self, other: &TableRef) -> bool {
        self.table.eq_ignore_ascii_case(&other.table)
            && match (&self.schema, &other.schema) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                (None, None) => true,
                _ => false,
            }
    }

    fn column(&self, column: String) -> ResolvedColumn {
        ResolvedColumn {
            schema: self.schema.clone(),
            table: self.table.clone(),
            column,
        }
    }
}

/// Alias (case-insensitive) to table. An alias bound to two different
/// tables anywhere in the statement resolves to nothing.
#[derive(Debug, Default)]
pub struct AliasMap {
    entries: HashMap<String, Option<TableRef>>,
}

impl AliasMap {
    pub fn from_refs(refs: &[TableRef]) -> Self {
        let mut entries: HashMap<String, Option<TableRef>> = HashMap::new();
        for r in refs {
            entries
                .entry(r.alias.to_ascii_lowercase())
                .and_modify(|bound| {
                    if bound.as_ref().is_some_and(|b| !b.same_table(r)) {
                        *bound = None;
                    }
                })
                .or_insert_with(|| Some(r.clone()));
        }
        Self { entries }
    }

    pub fn get(&self, alias: &str) -> Option<&TableRef> {
        self.entries
            .get(&alias.to_ascii_lowercase())
            .and_then(Option::as_ref)
    }
}

/// `JOIN <target> [ON <predicate>]`, predicate cut at the next clause keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub target: String,
    pub predicate: Option<String>,
}

/// Both sides of an identifier-to-identifier equality, split into parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equality {
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl Equality {
    pub fn text(parts: &[String]) -> String {
        parts.join(".")
    }
}

fn unquote(ident: &str) -> String {
    ident
        .trim()
        .trim_matches(|c| c == '"' || c == '`')
        .to_string()
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn is_literal_word(word: &str) -> bool {
    ["TRUE", "FALSE", "NULL"]
        .iter()
        .any(|w| w.eq_ignore_ascii_case(word))
}

/// Every table reference in `sql` (already whitespace-normalized).
pub fn extract_table_refs(sql: &str, dialect: Dialect) -> Vec<TableRef> {
    let mut refs = Vec::new();
    for keyword in REF_KEYWORD.find_iter(sql) {
        let is_from = keyword.as_str()[..4].eq_ignore_ascii_case("FROM");
        if is_from && !opens_from_clause(sql, keyword.start()) {
            continue;
        }

        let mut rest = &sql[keyword.end()..];
        while let Some((table_ref, tail)) = read_item(rest, dialect) {
            refs.extend(table_ref);
            match next_list_item(tail) {
                Some(next) if is_from => rest = next,
                _ => break,
            }
        }
    }
    refs
}

/// False for the `FROM` of `IS DISTINCT FROM` and of the `FROM`-taking
/// scalar functions.
fn opens_from_clause(sql: &str, from_at: usize) -> bool {
    let before = sql[..from_at].trim_end();
    if trailing_word(before).eq_ignore_ascii_case("DISTINCT") {
        return false;
    }

    match innermost_open_paren(before) {
        Some(open) => {
            let callee = trailing_word(before[..open].trim_end());
            !FROM_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(callee))
        }
        None => true,
    }
}

fn trailing_word(text: &str) -> &str {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map_or(text.len(), |(i, _)| i);
    &text[start..]
}

fn is_quote(c: char) -> bool {
    matches!(c, '\'' | '"' | '`')
}

/// Byte offset of the last `(` in `text` still open at its end. Quoted text
/// is skipped.
fn innermost_open_paren(text: &str) -> Option<usize> {
    let mut open = Vec::new();
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if is_quote(c) => quote = Some(c),
            None if c == '(' => open.push(i),
            None if c == ')' => {
                open.pop();
            }
            None => {}
        }
    }
    open.last().copied()
}

/// The rest of `text` after a parenthesized group it starts with.
fn skip_group(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if is_quote(c) => quote = Some(c),
            None if c == '(' => depth += 1,
            None if c == ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[i + 1..]);
                }
            }
            None => {}
        }
    }
    None
}

/// Text after the next top-level comma of the current FROM list, or `None`
/// once the list ends (clause keyword, closing paren or end of text).
/// Joins, their predicates and table options are stepped over.
fn next_list_item(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote = None;
    let mut word_start = None;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = word_start.take() {
            if depth == 0 && ends_from_list(&text[start..i]) {
                return None;
            }
        }
        match c {
            c if is_quote(c) => quote = Some(c),
            '(' => depth += 1,
            ')' if depth == 0 => return None,
            ')' => depth -= 1,
            ',' if depth == 0 => return Some(text[i + 1..].trim_start()),
            _ => {}
        }
    }
    None
}

fn ends_from_list(word: &str) -> bool {
    FROM_LIST_END.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// One FROM-list item at the start of `text`: the table it names (none for a
/// derived table) and the text after it.
fn read_item(text: &str, dialect: Dialect) -> Option<(Option<TableRef>, &str)> {
    let mut text = text;
    while let Some(m) = REF_MODIFIER.find(text) {
        text = &text[m.end()..];
    }

    if text.starts_with('(') {
        let tail = skip_group(text)?;
        return Some((None, skip_alias(tail).1));
    }

    let caps = REF_NAME.captures(text)?;
    let first = caps.get(1).map(|m| unquote(m.as_str()))?;
    let second = caps.get(2).map(|m| unquote(m.as_str()));
    let (schema, table) = match second {
        Some(table) => (Some(first), table),
        None if is_reserved(&first) => return None,
        None => (None, first),
    };

    let mut tail = &text[caps.get(0).map_or(0, |m| m.end())..];
    if tail.trim_start().starts_with('(') {
        tail = skip_group(tail.trim_start()).unwrap_or("");
    }
    let (alias, tail) = skip_alias(tail);

    let schema = schema.or_else(|| dialect.default_schema().map(str::to_string));
    let alias = alias.unwrap_or_else(|| table.clone());
    Some((
        Some(TableRef {
            schema,
            table,
            alias,
        }),
        tail,
    ))
}

/// An optional `[AS] alias`, with any column-alias list after it.
fn skip_alias(text: &str) -> (Option<String>, &str) {
    let Some(caps) = REF_ALIAS.captures(text) else {
        return (None, text);
    };
    let Some(name) = caps.get(1) else {
        return (None, text);
    };
    let alias = unquote(name.as_str());
    if is_reserved(&alias) {
        return (None, text);
    }

    let tail = &text[name.end()..];
    if tail.starts_with('(') {
        if let Some(after_columns) = skip_group(tail) {
            return (Some(alias), after_columns);
        }
    }
    (Some(alias), tail)
}

/// Every JOIN clause in `sql` (already whitespace-normalized).
pub fn extract_join_clauses(sql: &str) -> Vec<JoinClause> {
    let joins: Vec<_> = JOIN_KEYWORD.find_iter(sql).collect();
    let mut clauses = Vec::with_capacity(joins.len());

    for (i, join) in joins.iter().enumerate() {
        let segment_end = joins.get(i + 1).map_or(sql.len(), |next| next.start());
        let segment = &sql[join.end()..segment_end];

        let (target, predicate) = match ON_KEYWORD.find(segment) {
            Some(on) => {
                let tail = &segment[on.end()..];
                let end = PREDICATE_END.find(tail).map_or(tail.len(), |m| m.start());
                (&segment[..on.start()], Some(tail[..end].trim().to_string()))
            }
            None => {
                let end = PREDICATE_END.find(segment).map_or(segment.len(), |m| m.start());
                (&segment[..end], None)
            }
        };

        clauses.push(JoinClause {
            target: target.trim().to_string(),
            predicate,
        });
    }
    clauses
}

/// Identifier equalities in a join predicate. Comparisons against
/// literals, and against function calls, are skipped.
pub fn extract_equalities(predicate: &str) -> Vec<Equality> {
    let mut found = Vec::new();
    for caps in EQUALITY.captures_iter(predicate) {
        let (Some(left), Some(right)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let calls_function = predicate[right.end()..].trim_start().starts_with('(');
        if calls_function {
            continue;
        }

        let split = |operand: &str| -> Vec<String> { operand.split('.').map(unquote).collect() };
        let left = split(left.as_str());
        let right = split(right.as_str());
        let literal = |parts: &[String]| parts.len() == 1 && is_literal_word(&parts[0]);
        if literal(&left) || literal(&right) {
            continue;
        }
        found.push(Equality { left, right });
    }
    found
}

/// Resolve `alias.column` or `schema.table.column` to a table column.
/// Unqualified names and unknown aliases resolve to nothing.
pub fn resolve_column(parts: &[String], aliases: &AliasMap) -> Option<ResolvedColumn> {
    match parts {
        [qualifier, column] => aliases.get(qualifier).map(|t| t.column(column.clone())),
        [schema, table, column] => Some(ResolvedColumn {
            schema: Some(schema.clone()),
            table: table.clone(),
            column: column.clone(),
        }),
        _ => None,
    }
}
