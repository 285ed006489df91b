//! Tenant data source configuration
//!
//! Plaintext connection parameters for one workspace's database, tagged by
//! engine. Decryption happens upstream; this module only validates shape.

use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported relational engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    Mysql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::Mysql => "mysql",
        }
    }

    /// Schema assumed for unqualified table names, if the engine has one.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some("public"),
            Dialect::Mysql => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(NlqError::Config(format!("Unsupported dialect: {}", other))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
}

// Keeps the password out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl ConnectionConfig {
    /// Validate a decrypted config object for the given engine.
    ///
    /// `host`, `database`, `user`, `password` must be strings and `port` a
    /// number; `ssl` is only read for Postgres.
    pub fn from_json(dialect: Dialect, value: &serde_json::Value) -> Result<Self> {
        let invalid = || NlqError::NotFound(format!("Invalid {} config", dialect));

        let obj = value.as_object().ok_or_else(invalid)?;
        let text = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(invalid)
        };

        let port = obj
            .get("port")
            .and_then(|v| v.as_u64())
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(invalid)?;

        let ssl = match dialect {
            Dialect::Postgres => obj.get("ssl").and_then(|v| v.as_bool()).unwrap_or(false),
            Dialect::Mysql => false,
        };

        Ok(Self {
            dialect,
            host: text("host")?,
            port,
            database: text("database")?,
            user: text("user")?,
            password: text("password")?,
            ssl,
        })
    }
}
