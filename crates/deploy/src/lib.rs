//! cascade-deploy - Idempotent, dependency-ordered contract deployments.
//!
//! A [`Pipeline`] declares the units to provision and the configuration phases to run
//! between them. The [`Orchestrator`] executes it in order against a [`DeployBackend`],
//! an [`ArtifactResolver`] and a [`TransactionExecutor`], and records the resulting
//! role to address map in a [`SnapshotStore`] so later runs can reuse it.

mod artifact;
pub use artifact::{Artifact, ArtifactResolver, FoundryArtifacts};

mod backend;
pub use backend::{DeployBackend, Receipt, Transaction, TransactionExecutor};

pub mod call;
pub use call::{Batch, DecodedCall, MULTICALL3_ADDRESS, PreparedCall};

mod context;
pub use context::{ContextGuard, ContextStack, Scope};

mod deployer;
pub use deployer::{CASCADE_CONFIG_FILENAME, DEFAULT_RPC_URL, Deployer, RpcOrchestrator};

mod deployment_hash;
pub use deployment_hash::DeploymentConfigHash;

mod engine;
pub use engine::Orchestrator;

mod error;
pub use error::{DeployError, Result};

mod pipeline;
pub use pipeline::{
    ConfigurationOperation, ConfigurationPhase, Pipeline, PipelineBuilder, ProvisionStep, Step,
};

mod rpc;
pub use rpc::RpcClient;

mod settings;
pub use settings::{DEFAULT_SNAPSHOT_NAME, RunSettings};

mod snapshot;
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, SnapshotKey, SnapshotRecord, SnapshotStore,
};

mod unit;
pub use unit::{Arg, DeploymentResult, UnitDescriptor, UnitOverrides};

pub mod xnode;
pub use xnode::{VestingSettings, XnodeSettings};
