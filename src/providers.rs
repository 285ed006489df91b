//! Collaborator interfaces the pipeline depends on, plus a file-backed
//! implementation for single-workspace use.

use crate::connection::Dialect;
use crate::error::{NlqError, Result};
use crate::metadata::MetadataSnapshot;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// A workspace's data source: engine plus the decrypted config object.
#[derive(Clone)]
pub struct DataSourceDescriptor {
    pub dialect: Dialect,
    pub config: Value,
}

impl std::fmt::Debug for DataSourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceDescriptor")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    /// True when the workspace exists and belongs to the user.
    async fn is_owner(&self, user_id: i64, workspace_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Latest ingested snapshot; empty when nothing was ingested yet.
    async fn snapshot(&self, workspace_id: i64) -> Result<MetadataSnapshot>;
}

#[async_trait]
pub trait ConnectionConfigProvider: Send + Sync {
    /// `None` when the workspace has no data source.
    async fn decrypted_config(&self, workspace_id: i64) -> Result<Option<DataSourceDescriptor>>;
}

/// One workspace described by local files.
#[derive(Debug, Clone)]
pub struct StaticWorkspace {
    pub owner_id: i64,
    pub snapshot: MetadataSnapshot,
    pub data_source: Option<DataSourceDescriptor>,
}

impl StaticWorkspace {
    pub fn new(
        owner_id: i64,
        snapshot: MetadataSnapshot,
        data_source: Option<DataSourceDescriptor>,
    ) -> Self {
        Self {
            owner_id,
            snapshot,
            data_source,
        }
    }

    /// Load a snapshot file and, optionally, a connection file. The
    /// connection file is a config object with a `dialect` (or `type`) key.
    pub fn from_files(owner_id: i64, snapshot: &Path, connection: Option<&Path>) -> Result<Self> {
        let snapshot = MetadataSnapshot::load(snapshot)?;
        let data_source = match connection {
            Some(path) => Some(read_data_source(path)?),
            None => None,
        };
        Ok(Self::new(owner_id, snapshot, data_source))
    }

    pub fn workspace_id(&self) -> i64 {
        self.snapshot.workspace_id
    }
}

fn read_data_source(path: &Path) -> Result<DataSourceDescriptor> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NlqError::Config(format!("Failed to read connection {}: {}", path.display(), e))
    })?;
    let config: Value = serde_json::from_str(&content)?;
    let dialect = config
        .get("dialect")
        .or_else(|| config.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| NlqError::Config("Connection file has no dialect".to_string()))?
        .parse::<Dialect>()?;
    Ok(DataSourceDescriptor { dialect, config })
}

#[async_trait]
impl WorkspaceDirectory for StaticWorkspace {
    async fn is_owner(&self, user_id: i64, workspace_id: i64) -> Result<bool> {
        Ok(user_id == self.owner_id && workspace_id == self.workspace_id())
    }
}

#[async_trait]
impl MetadataProvider for StaticWorkspace {
    async fn snapshot(&self, workspace_id: i64) -> Result<MetadataSnapshot> {
        if workspace_id == self.workspace_id() {
            Ok(self.snapshot.clone())
        } else {
            Ok(MetadataSnapshot {
                workspace_id,
                ..MetadataSnapshot::default()
            })
        }
    }
}

#[async_trait]
impl ConnectionConfigProvider for StaticWorkspace {
    async fn decrypted_config(&self, workspace_id: i64) -> Result<Option<DataSourceDescriptor>> {
        if workspace_id == self.workspace_id() {
            Ok(self.data_source.clone())
        } else {
            Ok(None)
        }
    }
}
