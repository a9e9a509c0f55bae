//! Unit descriptors, argument bindings and deployment results.

use std::collections::BTreeMap;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use derive_more::Deref;
use serde::{Deserialize, Serialize};

/// Caller-supplied overrides merged into a unit's provisioning call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitOverrides {
    /// Account sending the deployment transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Value forwarded to the constructor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Gas limit for the deployment transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
}

impl UnitOverrides {
    /// Layer `other` on top of `self`. Fields set in `other` win.
    pub fn merge(&self, other: &UnitOverrides) -> UnitOverrides {
        UnitOverrides {
            from: other.from.or(self.from),
            value: other.value.or(self.value),
            gas: other.gas.or(self.gas),
        }
    }

    /// Stable textual form, independent of `Debug` output.
    pub(crate) fn canonical(&self) -> String {
        fn field<T: std::fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        format!(
            "from={} value={} gas={}",
            field(self.from),
            field(self.value),
            field(self.gas)
        )
    }
}

/// A constructor or call argument, either a literal or the identifier of an earlier role.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(DynSolValue),
    Role(String),
}

impl Arg {
    /// Reference the identifier provisioned for `role` earlier in the run.
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role(role.into())
    }

    pub fn address(address: Address) -> Self {
        Self::Value(DynSolValue::Address(address))
    }

    /// Unsigned integer literal of the given bit width.
    pub fn uint(value: U256, bits: usize) -> Self {
        Self::Value(DynSolValue::Uint(value, bits))
    }

    /// Name of the role this argument consumes, if any.
    pub fn consumed_role(&self) -> Option<&str> {
        match self {
            Self::Role(role) => Some(role),
            Self::Value(_) => None,
        }
    }

    /// Stable textual form: `@role` for a role, or the ABI type and encoding of a literal.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Self::Role(role) => format!("@{role}"),
            Self::Value(value) => {
                let ty = value
                    .as_type()
                    .map(|ty| ty.to_string())
                    .unwrap_or_else(|| "?".to_string());
                format!("{ty}:0x{}", hex::encode(value.abi_encode()))
            }
        }
    }

    /// Resolve the argument against the identifiers recorded so far.
    pub fn bind(&self, deployment: &DeploymentResult) -> Option<DynSolValue> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Role(role) => deployment.get(role).map(|address| DynSolValue::Address(*address)),
        }
    }
}

impl From<DynSolValue> for Arg {
    fn from(value: DynSolValue) -> Self {
        Self::Value(value)
    }
}

/// Everything the deploy backend needs to provision one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDescriptor {
    /// Logical role the identifier is recorded under.
    pub role: String,
    /// Artifact name identifying the provisioning logic.
    pub kind: String,
    /// Constructor arguments, with earlier identifiers already bound.
    pub init_args: Vec<DynSolValue>,
    pub overrides: UnitOverrides,
}

/// Identifiers produced by a run, keyed by role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentResult(BTreeMap<String, Address>);

impl DeploymentResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identifier of a role, returning the previous one if any.
    pub fn insert(&mut self, role: impl Into<String>, address: Address) -> Option<Address> {
        self.0.insert(role.into(), address)
    }

    pub fn address(&self, role: &str) -> Option<Address> {
        self.0.get(role).copied()
    }
}

impl FromIterator<(String, Address)> for DeploymentResult {
    fn from_iter<T: IntoIterator<Item = (String, Address)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
