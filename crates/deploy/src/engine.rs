//! Deployment execution engine.

use std::collections::{HashMap, hash_map::Entry};

use alloy_core::primitives::Address;

use crate::{
    artifact::{Artifact, ArtifactResolver},
    backend::{DeployBackend, Receipt, Transaction, TransactionExecutor},
    call::{self, PreparedCall},
    context::{ContextStack, Scope},
    deployment_hash::DeploymentConfigHash,
    error::{DeployError, Result},
    pipeline::{ConfigurationPhase, Pipeline, ProvisionStep, Step},
    settings::RunSettings,
    snapshot::{SnapshotKey, SnapshotRecord, SnapshotStore},
    unit::{DeploymentResult, UnitOverrides},
};

/// Drives a [`Pipeline`] against its collaborators.
///
/// Steps run strictly in declaration order, one at a time. A run either completes and
/// saves its [`DeploymentResult`], or fails and saves nothing.
pub struct Orchestrator<B, R, X, S> {
    pipeline: Pipeline,
    backend: B,
    artifacts: R,
    executor: X,
    snapshots: S,
    contexts: ContextStack,
}

impl<B, R, X, S> Orchestrator<B, R, X, S>
where
    B: DeployBackend,
    R: ArtifactResolver,
    X: TransactionExecutor,
    S: SnapshotStore,
{
    pub fn new(pipeline: Pipeline, backend: B, artifacts: R, executor: X, snapshots: S) -> Self {
        Self {
            pipeline,
            backend,
            artifacts,
            executor,
            snapshots,
            contexts: ContextStack::new(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn artifacts(&self) -> &R {
        &self.artifacts
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    /// Number of contexts currently open. Zero between runs.
    pub fn context_depth(&self) -> usize {
        self.contexts.depth()
    }

    /// Snapshot key a run with `settings` reads and writes.
    pub fn snapshot_key(&self, settings: &RunSettings) -> SnapshotKey {
        SnapshotKey::new(self.contexts.scope(), settings.snapshot.clone())
    }

    /// Run the pipeline.
    ///
    /// With `force_redeploy: Some(false)` an existing snapshot is returned unchanged and
    /// no external call is made. Otherwise every step runs and the result is saved.
    pub async fn run(&mut self, settings: &RunSettings) -> Result<DeploymentResult> {
        let key = self.snapshot_key(settings);
        let config_hash = DeploymentConfigHash::new(&self.pipeline, settings).compute_hash();

        if settings.reuse_existing() {
            let existing = self
                .snapshots
                .load(&key)
                .await
                .map_err(|source| DeployError::Snapshot {
                    key: key.to_string(),
                    source,
                })?;

            if let Some(record) = existing {
                if record.config_hash != config_hash {
                    tracing::warn!(
                        key = %key,
                        stored_hash = %record.config_hash,
                        current_hash = %config_hash,
                        "Configuration changed since the snapshot was taken; reusing it anyway (force a redeploy to apply changes)"
                    );
                }
                tracing::info!(
                    key = %key,
                    units = record.deployment.len(),
                    deployed_at = record.deployed_at,
                    "Existing deployment found, skipping deployment"
                );
                return Ok(record.deployment);
            }

            tracing::info!(key = %key, "No existing deployment found");
        }

        tracing::info!(
            key = %key,
            steps = self.pipeline.steps().len(),
            "Starting deployment process..."
        );

        let outcome = self.execute(settings).await;
        let balanced = self.contexts.ensure_balanced();
        let deployment = outcome?;
        balanced?;

        self.snapshots
            .save(&key, &SnapshotRecord::new(deployment.clone(), config_hash))
            .await
            .map_err(|source| DeployError::Snapshot {
                key: key.to_string(),
                source,
            })?;

        tracing::info!(key = %key, units = deployment.len(), "Deployment complete");
        Ok(deployment)
    }

    async fn execute(&mut self, settings: &RunSettings) -> Result<DeploymentResult> {
        let Self {
            pipeline,
            backend,
            artifacts,
            executor,
            contexts,
            ..
        } = self;
        let pipeline: &Pipeline = pipeline;

        let mut deployment = DeploymentResult::new();

        for step in pipeline.steps() {
            match step {
                Step::Provision(step) => {
                    let address = provision(
                        backend,
                        artifacts,
                        contexts,
                        step,
                        settings.overrides(&step.role),
                        &deployment,
                    )
                    .await?;
                    deployment.insert(step.role.clone(), address);
                }
                Step::Configure(phase) => {
                    configure(
                        artifacts,
                        executor,
                        contexts,
                        pipeline,
                        phase,
                        settings,
                        &deployment,
                    )
                    .await?;
                }
            }
        }

        Ok(deployment)
    }

    /// Build the aggregator transaction of every configuration phase against an existing
    /// deployment, without sending anything.
    pub async fn preview(
        &mut self,
        settings: &RunSettings,
        deployment: &DeploymentResult,
    ) -> Result<Vec<(String, Transaction)>> {
        let mut batches = Vec::new();

        for step in self.pipeline.steps() {
            let Step::Configure(phase) = step else {
                continue;
            };
            if phase.operations.is_empty() {
                continue;
            }

            let guard = self.contexts.push(phase.context.as_str());
            let tx = build_batch(
                &self.artifacts,
                guard.scope(),
                &self.pipeline,
                phase,
                settings,
                deployment,
            )
            .await;
            guard.pop()?;

            batches.push((phase.name.clone(), tx?));
        }

        self.contexts.ensure_balanced()?;
        Ok(batches)
    }
}

async fn provision<B: DeployBackend, R: ArtifactResolver>(
    backend: &B,
    artifacts: &R,
    contexts: &mut ContextStack,
    step: &ProvisionStep,
    overrides: Option<&UnitOverrides>,
    deployment: &DeploymentResult,
) -> Result<Address> {
    match &step.context {
        Some(context) => {
            let guard = contexts.push(context.as_str());
            let address =
                provision_in_scope(backend, artifacts, guard.scope(), step, overrides, deployment)
                    .await;
            guard.pop()?;
            address
        }
        None => {
            let scope = contexts.scope();
            provision_in_scope(backend, artifacts, &scope, step, overrides, deployment).await
        }
    }
}

async fn provision_in_scope<B: DeployBackend, R: ArtifactResolver>(
    backend: &B,
    artifacts: &R,
    scope: &Scope,
    step: &ProvisionStep,
    overrides: Option<&UnitOverrides>,
    deployment: &DeploymentResult,
) -> Result<Address> {
    let unit = step.bind(deployment, overrides)?;
    let artifact = resolve(artifacts, scope, &unit.kind).await?;
    let creation_code = call::creation_code(&artifact, &unit.init_args)?;

    tracing::info!(role = %unit.role, kind = %unit.kind, scope = %scope, "Provisioning unit...");

    let address = backend
        .provision(scope, &unit, &creation_code)
        .await
        .map_err(|source| DeployError::Provisioning {
            role: unit.role.clone(),
            kind: unit.kind.clone(),
            source,
        })?;

    tracing::info!(role = %unit.role, %address, "Unit provisioned");
    Ok(address)
}

async fn configure<R: ArtifactResolver, X: TransactionExecutor>(
    artifacts: &R,
    executor: &X,
    contexts: &mut ContextStack,
    pipeline: &Pipeline,
    phase: &ConfigurationPhase,
    settings: &RunSettings,
    deployment: &DeploymentResult,
) -> Result<()> {
    if phase.operations.is_empty() {
        tracing::info!(phase = %phase.name, "No configuration operations, skipping phase");
        return Ok(());
    }

    let guard = contexts.push(phase.context.as_str());
    let outcome = configure_in_scope(
        artifacts,
        executor,
        guard.scope(),
        pipeline,
        phase,
        settings,
        deployment,
    )
    .await;
    guard.pop()?;

    let receipt = outcome?;
    tracing::info!(
        phase = %phase.name,
        tx_hash = %receipt.transaction_hash,
        block_number = ?receipt.block_number,
        "Configuration batch executed"
    );
    Ok(())
}

async fn configure_in_scope<R: ArtifactResolver, X: TransactionExecutor>(
    artifacts: &R,
    executor: &X,
    scope: &Scope,
    pipeline: &Pipeline,
    phase: &ConfigurationPhase,
    settings: &RunSettings,
    deployment: &DeploymentResult,
) -> Result<Receipt> {
    let tx = build_batch(artifacts, scope, pipeline, phase, settings, deployment).await?;

    tracing::info!(
        phase = %phase.name,
        scope = %scope,
        operations = phase.operations.len(),
        aggregator = %tx.to,
        "Sending configuration batch..."
    );

    executor
        .send(&tx)
        .await
        .map_err(|source| DeployError::Execution {
            phase: phase.name.clone(),
            source,
        })
}

/// Prepare every operation of `phase` and fold them into one aggregator transaction.
async fn build_batch<R: ArtifactResolver>(
    artifacts: &R,
    scope: &Scope,
    pipeline: &Pipeline,
    phase: &ConfigurationPhase,
    settings: &RunSettings,
    deployment: &DeploymentResult,
) -> Result<Transaction> {
    let mut resolved: HashMap<&str, Artifact> = HashMap::new();
    let mut calls = Vec::with_capacity(phase.operations.len());

    for op in &phase.operations {
        let target = deployment.address(&op.target).ok_or_else(|| {
            DeployError::pipeline(format!(
                "phase `{}` targets `{}` which has no recorded identifier",
                phase.name, op.target
            ))
        })?;

        let kind = match &op.interface {
            Some(kind) => kind.as_str(),
            None => pipeline.kind_of(&op.target).ok_or_else(|| {
                DeployError::pipeline(format!("unknown kind for role `{}`", op.target))
            })?,
        };

        let artifact = match resolved.entry(kind) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(resolve(artifacts, scope, kind).await?),
        };

        let args = op.bind_args(deployment)?;
        let function = call::select_function(&artifact.abi, &op.function, &args)?.ok_or_else(
            || DeployError::Resolution {
                kind: kind.to_string(),
                scope: scope.clone(),
                source: anyhow::anyhow!("ABI has no function `{}`", op.function),
            },
        )?;

        let prepared = PreparedCall::new(target, function, &args, op.value)?;
        tracing::debug!(
            phase = %phase.name,
            target = %target,
            role = %op.target,
            function = %prepared.signature,
            "Configuration operation prepared"
        );
        calls.push(prepared);
    }

    let batch = call::aggregate(&calls)?;
    Ok(Transaction {
        from: settings.caller,
        to: settings.aggregator,
        value: batch.value,
        data: batch.calldata,
        gas: None,
    })
}

async fn resolve<R: ArtifactResolver>(
    artifacts: &R,
    scope: &Scope,
    kind: &str,
) -> Result<Artifact> {
    artifacts
        .resolve(scope, kind)
        .await
        .map_err(|source| DeployError::Resolution {
            kind: kind.to_string(),
            scope: scope.clone(),
            source,
        })
}
