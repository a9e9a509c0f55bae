//! Artifact (ABI + bytecode) resolution, scoped by the active context.

use std::{
    future::Future,
    path::{Component, Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::Context;
use serde::Deserialize;

use crate::context::Scope;

/// Compiled unit: its ABI and creation bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Name of the contract the artifact was built from.
    pub kind: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

/// Resolves the artifact of a unit kind within a scope.
pub trait ArtifactResolver: Send + Sync {
    /// Fails if `kind` is unknown within `scope`.
    fn resolve(
        &self,
        scope: &Scope,
        kind: &str,
    ) -> impl Future<Output = anyhow::Result<Artifact>> + Send;
}

#[derive(Debug, Deserialize)]
struct FoundryArtifact {
    abi: JsonAbi,
    bytecode: FoundryBytecode,
}

#[derive(Debug, Deserialize)]
struct FoundryBytecode {
    object: Bytes,
}

/// Reads Foundry build output.
///
/// The artifact of `Kind` in scope `lib/vesting` lives at
/// `<root>/lib/vesting/out/Kind.sol/Kind.json`.
#[derive(Debug, Clone)]
pub struct FoundryArtifacts {
    root: PathBuf,
}

impl FoundryArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the artifact file for `kind` in `scope`.
    pub fn artifact_path(&self, scope: &Scope, kind: &str) -> anyhow::Result<PathBuf> {
        let scope_path = scope.path();
        let escapes = scope_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            anyhow::bail!("Scope `{}` escapes the artifact root", scope);
        }

        if kind.is_empty() || kind.contains(['/', '\\']) || kind == ".." {
            anyhow::bail!("Invalid unit kind `{}`", kind);
        }

        Ok(self
            .root
            .join(scope_path)
            .join("out")
            .join(format!("{kind}.sol"))
            .join(format!("{kind}.json")))
    }
}

impl ArtifactResolver for FoundryArtifacts {
    async fn resolve(&self, scope: &Scope, kind: &str) -> anyhow::Result<Artifact> {
        let path = self.artifact_path(scope, kind)?;

        if !tokio::fs::try_exists(&path)
            .await
            .context(format!("Failed to check artifact {}", path.display()))?
        {
            anyhow::bail!("Artifact not found: {}", path.display());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .context(format!("Failed to read artifact from {}", path.display()))?;
        let artifact: FoundryArtifact = serde_json::from_str(&content)
            .context(format!("Failed to parse artifact {}", path.display()))?;

        tracing::debug!(
            kind,
            scope = %scope,
            path = %path.display(),
            functions = artifact.abi.functions.len(),
            "Artifact resolved"
        );

        Ok(Artifact {
            kind: kind.to_string(),
            abi: artifact.abi,
            bytecode: artifact.bytecode.object,
        })
    }
}
