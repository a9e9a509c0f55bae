//! Hand-authored deployment pipelines.
//!
//! A [`Pipeline`] is an ordered list of steps: provisioning a unit, or running a
//! configuration phase against units provisioned earlier. Steps consume earlier
//! identifiers by role name; [`PipelineBuilder::build`] rejects any step consuming a
//! role that no earlier step produces, so a misordered pipeline fails before the first
//! external call.
//!
//! # Example
//!
//! ```
//! use cascade_deploy::{Arg, ConfigurationOperation, ConfigurationPhase, Pipeline, ProvisionStep};
//!
//! let pipeline = Pipeline::builder()
//!     .then(ProvisionStep::new("token", "Token"))
//!     .then(ProvisionStep::new("sale", "Sale").arg(Arg::role("token")))
//!     .then(
//!         ConfigurationPhase::new("wiring", "lib/access")
//!             .operation(
//!                 ConfigurationOperation::new("token", "transferOwnership").arg(Arg::role("sale")),
//!             ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(pipeline.roles().collect::<Vec<_>>(), ["token", "sale"]);
//! ```

use std::collections::BTreeSet;

use alloy_core::{dyn_abi::DynSolValue, primitives::U256};

use crate::{
    error::{DeployError, Result},
    unit::{Arg, DeploymentResult, UnitDescriptor, UnitOverrides},
};

/// Provision one unit and record its identifier under `role`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionStep {
    pub role: String,
    pub kind: String,
    pub args: Vec<Arg>,
    /// Context pushed around artifact resolution and provisioning.
    pub context: Option<String>,
    /// Pipeline-level overrides; the caller's per-role overrides are layered on top.
    pub overrides: UnitOverrides,
}

impl ProvisionStep {
    pub fn new(role: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            kind: kind.into(),
            args: Vec::new(),
            context: None,
            overrides: UnitOverrides::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn overrides(mut self, overrides: UnitOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Build the unit descriptor from the identifiers recorded so far.
    pub fn bind(
        &self,
        deployment: &DeploymentResult,
        caller_overrides: Option<&UnitOverrides>,
    ) -> Result<UnitDescriptor> {
        Ok(UnitDescriptor {
            role: self.role.clone(),
            kind: self.kind.clone(),
            init_args: bind_args(&self.role, &self.args, deployment)?,
            overrides: match caller_overrides {
                Some(caller) => self.overrides.merge(caller),
                None => self.overrides.clone(),
            },
        })
    }
}

/// One logical call against a provisioned unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationOperation {
    /// Role of the unit the call targets.
    pub target: String,
    /// Artifact providing the function ABI. Defaults to the target's own kind.
    pub interface: Option<String>,
    pub function: String,
    pub args: Vec<Arg>,
    pub value: U256,
}

impl ConfigurationOperation {
    pub fn new(target: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            interface: None,
            function: function.into(),
            args: Vec::new(),
            value: U256::ZERO,
        }
    }

    pub fn interface(mut self, kind: impl Into<String>) -> Self {
        self.interface = Some(kind.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn bind_args(&self, deployment: &DeploymentResult) -> Result<Vec<DynSolValue>> {
        bind_args(&self.function, &self.args, deployment)
    }
}

/// Configuration operations executed as one aggregated transaction inside a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationPhase {
    pub name: String,
    pub context: String,
    pub operations: Vec<ConfigurationOperation>,
}

impl ConfigurationPhase {
    pub fn new(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, operation: ConfigurationOperation) -> Self {
        self.operations.push(operation);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Provision(ProvisionStep),
    Configure(ConfigurationPhase),
}

impl From<ProvisionStep> for Step {
    fn from(step: ProvisionStep) -> Self {
        Self::Provision(step)
    }
}

impl From<ConfigurationPhase> for Step {
    fn from(phase: ConfigurationPhase) -> Self {
        Self::Configure(phase)
    }
}

/// A validated, ordered list of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Roles provisioned by the pipeline, in declaration order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.provision_steps().map(|step| step.role.as_str())
    }

    /// Unit kind provisioned under `role`.
    pub fn kind_of(&self, role: &str) -> Option<&str> {
        self.provision_steps()
            .find(|step| step.role == role)
            .map(|step| step.kind.as_str())
    }

    /// One line per step describing what it does, used to fingerprint deployments.
    pub fn fingerprint(&self) -> Vec<String> {
        fn args(args: &[Arg]) -> String {
            args.iter().map(Arg::canonical).collect::<Vec<_>>().join(",")
        }

        self.steps
            .iter()
            .map(|step| match step {
                Step::Provision(p) => format!(
                    "provision {} {} context={} args=[{}] overrides=[{}]",
                    p.role,
                    p.kind,
                    p.context.as_deref().unwrap_or("-"),
                    args(&p.args),
                    p.overrides.canonical()
                ),
                Step::Configure(c) => {
                    let operations = c
                        .operations
                        .iter()
                        .map(|op| {
                            format!(
                                "{}.{}({}) via={} value={}",
                                op.target,
                                op.function,
                                args(&op.args),
                                op.interface.as_deref().unwrap_or("-"),
                                op.value
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(";");
                    format!(
                        "configure {} context={} operations=[{operations}]",
                        c.name, c.context
                    )
                }
            })
            .collect()
    }

    fn provision_steps(&self) -> impl Iterator<Item = &ProvisionStep> {
        self.steps.iter().filter_map(|step| match step {
            Step::Provision(p) => Some(p),
            Step::Configure(_) => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    /// Append a step after the ones declared so far.
    pub fn then(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Check that every consumed role was produced by an earlier step and that role
    /// names are unique.
    pub fn build(self) -> Result<Pipeline> {
        let mut produced = BTreeSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Provision(p) => {
                    for role in p.args.iter().filter_map(Arg::consumed_role) {
                        if !produced.contains(role) {
                            return Err(DeployError::pipeline(format!(
                                "step #{index} (`{}`) consumes `{role}` before it is provisioned",
                                p.role
                            )));
                        }
                    }
                    if !produced.insert(p.role.as_str()) {
                        return Err(DeployError::pipeline(format!(
                            "role `{}` is provisioned more than once",
                            p.role
                        )));
                    }
                }
                Step::Configure(c) => {
                    for op in &c.operations {
                        let consumed = std::iter::once(op.target.as_str())
                            .chain(op.args.iter().filter_map(Arg::consumed_role));
                        for role in consumed {
                            if !produced.contains(role) {
                                return Err(DeployError::pipeline(format!(
                                    "phase `{}` ({}) uses `{role}` before it is provisioned",
                                    c.name, op.function
                                )));
                            }
                        }
                    }
                }
            }
        }

        Ok(Pipeline { steps: self.steps })
    }
}

fn bind_args(owner: &str, args: &[Arg], deployment: &DeploymentResult) -> Result<Vec<DynSolValue>> {
    args.iter()
        .map(|arg| {
            arg.bind(deployment).ok_or_else(|| {
                DeployError::pipeline(format!(
                    "`{owner}` consumes `{}` which has no recorded identifier",
                    arg.consumed_role().unwrap_or_default()
                ))
            })
        })
        .collect()
}
