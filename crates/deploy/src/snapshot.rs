//! Snapshot storage: the idempotency substrate of the orchestrator.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{context::Scope, settings::DEFAULT_SNAPSHOT_NAME, unit::DeploymentResult};

/// Identifies a stored deployment: a name within the scope it was taken in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    scope: Scope,
    name: String,
}

impl SnapshotKey {
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// The `latest` snapshot of the root scope.
    pub fn latest() -> Self {
        Self::new(Scope::root(), DEFAULT_SNAPSHOT_NAME)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the snapshot relative to a store root.
    pub fn relative_path(&self) -> PathBuf {
        self.scope.path().join(format!("{}.json", self.name))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_root() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.scope, self.name)
        }
    }
}

/// A persisted deployment along with the metadata of the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub deployment: DeploymentResult,
    /// SHA-256 of the deployment configuration.
    ///
    /// See [`DeploymentConfigHash`](crate::DeploymentConfigHash).
    pub config_hash: String,
    /// Unix timestamp when the snapshot was written.
    pub deployed_at: i64,
    /// Version of the orchestrator that wrote the snapshot.
    pub version: String,
}

impl SnapshotRecord {
    /// Create a record stamped with the current time and crate version.
    pub fn new(deployment: DeploymentResult, config_hash: String) -> Self {
        Self {
            deployment,
            config_hash,
            deployed_at: chrono::Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Keyed load/save of deployment snapshots.
///
/// A present snapshot is the only idempotency signal the orchestrator trusts.
pub trait SnapshotStore: Send + Sync {
    fn load(
        &self,
        key: &SnapshotKey,
    ) -> impl Future<Output = anyhow::Result<Option<SnapshotRecord>>> + Send;

    fn save(
        &self,
        key: &SnapshotKey,
        record: &SnapshotRecord,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Stores snapshots as pretty JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &SnapshotKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &SnapshotKey) -> anyhow::Result<Option<SnapshotRecord>> {
        let path = self.path(key);

        if !tokio::fs::try_exists(&path)
            .await
            .context(format!("Failed to check snapshot {}", path.display()))?
        {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .context(format!("Failed to read snapshot from {}", path.display()))?;
        let record: SnapshotRecord = serde_json::from_str(&content)
            .context(format!("Failed to parse snapshot {}", path.display()))?;

        tracing::debug!(key = %key, path = %path.display(), "Snapshot loaded");
        Ok(Some(record))
    }

    async fn save(&self, key: &SnapshotKey, record: &SnapshotRecord) -> anyhow::Result<()> {
        let path = self.path(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.context(format!(
                "Failed to create snapshot directory {}",
                parent.display()
            ))?;
        }

        let json = serde_json::to_string_pretty(record).context("Failed to serialize snapshot")?;

        // Write next to the target and rename so a reader never sees a truncated file.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .context(format!("Failed to write snapshot to {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context(format!("Failed to move snapshot into {}", path.display()))?;

        tracing::info!(key = %key, path = %path.display(), "Snapshot saved");
        Ok(())
    }
}

/// Keeps snapshots in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    records: Mutex<HashMap<SnapshotKey, SnapshotRecord>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SnapshotKey, record: SnapshotRecord) {
        self.lock().insert(key, record);
    }

    pub fn get(&self, key: &SnapshotKey) -> Option<SnapshotRecord> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SnapshotKey, SnapshotRecord>> {
        // A poisoned map is still consistent: every operation is a single insert or read.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &SnapshotKey) -> anyhow::Result<Option<SnapshotRecord>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &SnapshotKey, record: &SnapshotRecord) -> anyhow::Result<()> {
        self.insert(key.clone(), record.clone());
        Ok(())
    }
}
