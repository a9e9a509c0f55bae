//! The Xnode units deployment pipeline.
//!
//! 1. `xnodeUnit`: `XnodeUnit()`
//! 2. `xnodeUnitEntitlement`: `XnodeUnitEntitlement(xnodeUnit)`
//! 3. `xnodeUnitEntitlementClaimer`: `XnodeUnitEntitlementClaimer(xnodeUnitEntitlement, signer)`
//! 4. `permissions` phase (optional): mint rights granted along the chain, in one batch
//! 5. `xnodeUnitsOPENVesting` (optional): linear vesting of an ERC20 over the units

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256, address, keccak256},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DeployError, Result},
    pipeline::{ConfigurationOperation, ConfigurationPhase, Pipeline, ProvisionStep},
    unit::Arg,
};

pub const XNODE_UNIT: &str = "xnodeUnit";
pub const XNODE_UNIT_ENTITLEMENT: &str = "xnodeUnitEntitlement";
pub const XNODE_UNIT_ENTITLEMENT_CLAIMER: &str = "xnodeUnitEntitlementClaimer";
pub const XNODE_UNITS_OPEN_VESTING: &str = "xnodeUnitsOPENVesting";

/// Context holding the access control interface used by the permissions phase.
pub const PERMISSIONS_CONTEXT: &str = "lib/openzeppelin-contracts";
/// Context holding the vesting contracts.
pub const VESTING_CONTEXT: &str = "lib/vesting";

/// Signer whose signatures the claimer accepts by default.
pub const DEFAULT_CLAIMER_SIGNER: Address = address!("57b5F9b5504fb47a9E1E6D8ecc7DfEE1724F9c0a");
/// sOPEN token vested by default.
pub const DEFAULT_VESTING_TOKEN: Address = address!("c7b10907033Ca6e2FC00FCbb8CDD5cD89f141384");
/// 2024-06-10T00:00:00Z
pub const DEFAULT_VESTING_START: u64 = 1_717_977_600;
/// 2025-06-10T00:00:00Z
pub const DEFAULT_VESTING_END: u64 = 1_749_513_600;

const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

/// Vesting schedule of the optional vesting unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingSettings {
    pub token: Address,
    /// Amount vested per unit, in wei.
    pub amount: U256,
    /// Unix timestamp the vesting starts at.
    pub start: u64,
    /// Unix timestamp the vesting ends at.
    pub end: u64,
}

impl Default for VestingSettings {
    fn default() -> Self {
        Self {
            token: DEFAULT_VESTING_TOKEN,
            amount: U256::from(200u64) * U256::from(WEI_PER_ETHER),
            start: DEFAULT_VESTING_START,
            end: DEFAULT_VESTING_END,
        }
    }
}

impl VestingSettings {
    /// Length of the vesting in seconds. Fails when the schedule ends before it starts.
    pub fn duration(&self) -> Result<u64> {
        self.end.checked_sub(self.start).ok_or_else(|| {
            DeployError::pipeline(format!(
                "vesting ends at {} before it starts at {}",
                self.end, self.start
            ))
        })
    }
}

/// Settings of the Xnode units pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XnodeSettings {
    /// Signer accepted by the entitlement claimer.
    pub claimer_signer: Address,
    /// Run the permissions phase after the claimer is deployed.
    ///
    /// The phase goes through the run's aggregator, so the units see the aggregator as
    /// `msg.sender`: it must hold the admin role of `MINT_ROLE` on both `xnodeUnit` and
    /// `xnodeUnitEntitlement`, which the canonical Multicall3 never does. Off by default.
    pub grant_permissions: bool,
    /// Deploy the vesting unit with this schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vesting: Option<VestingSettings>,
}

impl Default for XnodeSettings {
    fn default() -> Self {
        Self {
            claimer_signer: DEFAULT_CLAIMER_SIGNER,
            grant_permissions: false,
            vesting: None,
        }
    }
}

/// `keccak256("MINT_ROLE")`
pub fn mint_role() -> DynSolValue {
    DynSolValue::FixedBytes(keccak256("MINT_ROLE"), 32)
}

/// Build the Xnode units pipeline.
pub fn pipeline(settings: &XnodeSettings) -> Result<Pipeline> {
    let mut builder = Pipeline::builder()
        .then(ProvisionStep::new(XNODE_UNIT, "XnodeUnit"))
        .then(
            ProvisionStep::new(XNODE_UNIT_ENTITLEMENT, "XnodeUnitEntitlement")
                .arg(Arg::role(XNODE_UNIT)),
        )
        .then(
            ProvisionStep::new(XNODE_UNIT_ENTITLEMENT_CLAIMER, "XnodeUnitEntitlementClaimer")
                .arg(Arg::role(XNODE_UNIT_ENTITLEMENT))
                .arg(Arg::address(settings.claimer_signer)),
        );

    if settings.grant_permissions {
        builder = builder.then(
            ConfigurationPhase::new("permissions", PERMISSIONS_CONTEXT)
                .operation(
                    ConfigurationOperation::new(XNODE_UNIT, "grantRole")
                        .interface("AccessControl")
                        .arg(mint_role())
                        .arg(Arg::role(XNODE_UNIT_ENTITLEMENT)),
                )
                .operation(
                    ConfigurationOperation::new(XNODE_UNIT_ENTITLEMENT, "grantRole")
                        .interface("AccessControl")
                        .arg(mint_role())
                        .arg(Arg::role(XNODE_UNIT_ENTITLEMENT_CLAIMER)),
                ),
        );
    }

    if let Some(vesting) = &settings.vesting {
        let duration = vesting.duration()?;
        builder = builder.then(
            ProvisionStep::new(
                XNODE_UNITS_OPEN_VESTING,
                "MultiERC721TokenLinearERC20TransferVesting",
            )
            .context(VESTING_CONTEXT)
            .arg(Arg::address(vesting.token))
            .arg(Arg::uint(vesting.amount, 96))
            .arg(Arg::uint(U256::from(vesting.start), 64))
            .arg(Arg::uint(U256::from(duration), 64))
            .arg(Arg::role(XNODE_UNIT)),
        );
    }

    builder.build()
}
