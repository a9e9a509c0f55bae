//! Per-run settings.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{call::MULTICALL3_ADDRESS, unit::UnitOverrides};

/// Default snapshot name.
pub const DEFAULT_SNAPSHOT_NAME: &str = "latest";

fn default_snapshot_name() -> String {
    DEFAULT_SNAPSHOT_NAME.to_string()
}

fn default_aggregator() -> Address {
    MULTICALL3_ADDRESS
}

/// Settings of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// `Some(false)` reuses an existing snapshot; unset or `Some(true)` always redeploys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_redeploy: Option<bool>,
    /// Name the deployment snapshot is stored under.
    #[serde(default = "default_snapshot_name")]
    pub snapshot: String,
    /// Identity sending configuration batches. Falls back to the executor's default account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Address>,
    /// Contract receiving the aggregated configuration calls.
    #[serde(default = "default_aggregator")]
    pub aggregator: Address,
    /// Overrides merged into the provisioning call of each role.
    #[serde(default)]
    pub units: BTreeMap<String, UnitOverrides>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            force_redeploy: None,
            snapshot: default_snapshot_name(),
            caller: None,
            aggregator: default_aggregator(),
            units: BTreeMap::new(),
        }
    }
}

impl RunSettings {
    /// Whether an existing snapshot should be returned instead of redeploying.
    pub fn reuse_existing(&self) -> bool {
        self.force_redeploy == Some(false)
    }

    pub fn overrides(&self, role: &str) -> Option<&UnitOverrides> {
        self.units.get(role)
    }
}
