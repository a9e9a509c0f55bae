use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{pipeline::Pipeline, settings::RunSettings, unit::UnitOverrides};

/// Inputs that determine what a run provisions.
///
/// Snapshot-only settings (`force_redeploy`, the snapshot name) are excluded: changing
/// them does not change the resulting deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfigHash {
    /// One line per pipeline step (roles, kinds, arguments, contexts, operations).
    pub steps: Vec<String>,
    /// Caller overrides per role.
    pub units: BTreeMap<String, UnitOverrides>,
    pub aggregator: Address,
    pub caller: Option<Address>,
}

impl DeploymentConfigHash {
    pub fn new(pipeline: &Pipeline, settings: &RunSettings) -> Self {
        Self {
            steps: pipeline.fingerprint(),
            units: settings.units.clone(),
            aggregator: settings.aggregator,
            caller: settings.caller,
        }
    }

    /// Compute a SHA-256 hash of this configuration.
    ///
    /// The hash is deterministic - the same configuration always produces the same hash.
    /// Fields are fed in a fixed order, each length-prefixed so adjacent values cannot
    /// run into each other.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        let mut feed = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        };

        for step in &self.steps {
            feed(step.as_bytes());
        }
        for (role, overrides) in &self.units {
            feed(role.as_bytes());
            feed(overrides.canonical().as_bytes());
        }
        feed(self.aggregator.as_slice());
        feed(self.caller.map(|c| c.to_vec()).unwrap_or_default().as_slice());

        hex::encode(hasher.finalize())
    }
}
