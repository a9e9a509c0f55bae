use std::path::PathBuf;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    DeploymentResult, FileSnapshotStore, FoundryArtifacts, Orchestrator, RpcClient, RunSettings,
    Scope, SnapshotKey, SnapshotRecord, SnapshotStore, Transaction, XnodeSettings, xnode,
};

/// The default name for the cascade configuration file.
pub const CASCADE_CONFIG_FILENAME: &str = "Cascade.toml";

/// Default JSON-RPC endpoint (a local anvil node).
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// The orchestrator wired to a JSON-RPC node, foundry artifacts and file snapshots.
pub type RpcOrchestrator = Orchestrator<RpcClient, FoundryArtifacts, RpcClient, FileSnapshotStore>;

/// Main deployer running the Xnode units pipeline against a node.
///
/// This struct contains all the configuration needed to run a deployment
/// and can be serialized to/from TOML format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployer {
    /// The JSON-RPC endpoint units are deployed through.
    pub rpc_url: String,
    /// Account sending transactions when a unit or batch does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    /// Root of the contract workspace holding the build artifacts.
    pub artifacts: PathBuf,
    /// Directory deployment snapshots are stored in.
    pub snapshots: PathBuf,

    /// Settings of the orchestration run.
    #[serde(flatten)]
    pub run: RunSettings,
    /// Configuration of the Xnode units pipeline.
    pub xnode: XnodeSettings,
}

impl Default for Deployer {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            sender: None,
            artifacts: PathBuf::from("."),
            snapshots: PathBuf::from("deployments"),
            run: RunSettings::default(),
            xnode: XnodeSettings::default(),
        }
    }
}

impl Deployer {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployer config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Cascade.toml` inside a directory.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(CASCADE_CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration next to the snapshots (`Cascade.toml` in the snapshot directory).
    pub fn save_config(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.snapshots).context(format!(
            "Failed to create snapshot directory {}",
            self.snapshots.display()
        ))?;
        let config_path = self.snapshots.join(CASCADE_CONFIG_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    /// Key of the snapshot this deployer reads and writes.
    pub fn snapshot_key(&self) -> SnapshotKey {
        SnapshotKey::new(Scope::root(), self.run.snapshot.clone())
    }

    /// Build the orchestrator for the configured pipeline and collaborators.
    pub fn orchestrator(&self) -> Result<RpcOrchestrator> {
        let pipeline = xnode::pipeline(&self.xnode).context("Invalid Xnode pipeline")?;
        let client = RpcClient::new(&self.rpc_url)?.with_default_from(self.sender);

        Ok(Orchestrator::new(
            pipeline,
            client.clone(),
            FoundryArtifacts::new(&self.artifacts),
            client,
            FileSnapshotStore::new(&self.snapshots),
        ))
    }

    /// Run the deployment, reusing the stored snapshot when allowed.
    pub async fn deploy(&self) -> Result<DeploymentResult> {
        tracing::info!(
            rpc_url = %self.rpc_url,
            artifacts = %self.artifacts.display(),
            snapshots = %self.snapshots.display(),
            force_redeploy = ?self.run.force_redeploy,
            "Starting deployment..."
        );

        let mut orchestrator = self.orchestrator()?;
        let deployment = orchestrator.run(&self.run).await?;
        Ok(deployment)
    }

    /// Load the stored snapshot, if any.
    pub async fn load_snapshot(&self) -> Result<Option<SnapshotRecord>> {
        FileSnapshotStore::new(&self.snapshots)
            .load(&self.snapshot_key())
            .await
    }

    /// Build the configuration batches for the stored deployment without sending them.
    pub async fn preview(&self) -> Result<Vec<(String, Transaction)>> {
        let record = self.load_snapshot().await?.with_context(|| {
            format!(
                "No snapshot `{}` in {}, deploy first",
                self.snapshot_key(),
                self.snapshots.display()
            )
        })?;

        let mut orchestrator = self.orchestrator()?;
        let batches = orchestrator.preview(&self.run, &record.deployment).await?;
        Ok(batches)
    }
}
