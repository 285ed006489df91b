//! Runtime configuration from environment variables.

use crate::error::{NlqError, Result};
use std::str::FromStr;
use std::time::Duration;

/// Which HTTP shape an LLM request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStyle {
    /// `/v1/chat/completions`
    Chat,
    /// `/v1/completions`
    Completion,
}

impl FromStr for EndpointStyle {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(EndpointStyle::Chat),
            "completion" | "completions" => Ok(EndpointStyle::Completion),
            other => Err(NlqError::Config(format!("Unknown LLM endpoint style: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub retries: u32,
    pub endpoint_styles: Vec<EndpointStyle>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            max_tokens: 1024,
            retries: 2,
            endpoint_styles: vec![EndpointStyle::Chat, EndpointStyle::Completion],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmSettings,
    /// Request store database; requests are kept in memory when unset.
    pub database_url: Option<String>,
    pub rate_limit_per_minute: usize,
    pub query_timeout: Duration,
    pub force_limit: u64,
    pub max_rows: usize,
    pub max_bytes: usize,
    pub sql_repair_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            database_url: None,
            rate_limit_per_minute: 30,
            query_timeout: Duration::from_millis(10_000),
            force_limit: 101,
            max_rows: 100,
            max_bytes: 200 * 1024,
            sql_repair_enabled: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let endpoint_styles = match get("LLM_ENDPOINT_STYLES") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(EndpointStyle::from_str)
                .collect::<Result<Vec<_>>>()?,
            None => defaults.llm.endpoint_styles.clone(),
        };
        if endpoint_styles.is_empty() {
            return Err(NlqError::Config("LLM_ENDPOINT_STYLES is empty".to_string()));
        }

        let llm = LlmSettings {
            base_url: get("LLM_BASE_URL")
                .or_else(|| get("OPENAI_BASE_URL"))
                .unwrap_or(defaults.llm.base_url),
            api_key: get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            model: get("LLM_MODEL")
                .or_else(|| get("OPENAI_MODEL"))
                .unwrap_or(defaults.llm.model),
            max_tokens: parse(&get, "LLM_MAX_TOKENS", defaults.llm.max_tokens)?,
            retries: parse(&get, "LLM_RETRIES", defaults.llm.retries)?,
            endpoint_styles,
        };

        Ok(Self {
            llm,
            database_url: get("DATABASE_URL"),
            rate_limit_per_minute: parse(&get, "RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?,
            query_timeout: Duration::from_millis(parse(&get, "QUERY_TIMEOUT_MS", 10_000u64)?),
            force_limit: parse(&get, "GUARD_FORCE_LIMIT", defaults.force_limit)?,
            max_rows: parse(&get, "RESULT_MAX_ROWS", defaults.max_rows)?,
            max_bytes: parse(&get, "RESULT_MAX_BYTES", defaults.max_bytes)?,
            sql_repair_enabled: parse(&get, "SQL_REPAIR_ENABLED", defaults.sql_repair_enabled)?,
        })
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| NlqError::Config(format!("Invalid {}={}: {}", key, raw, e))),
        None => Ok(default),
    }
}
