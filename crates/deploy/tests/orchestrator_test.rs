//! Integration tests for the orchestration engine.
//!
//! The engine is driven against recording in-memory collaborators, so every external
//! side effect of a run can be asserted on.
//! Run with: cargo test --test orchestrator_test

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU8, Ordering},
    },
};

use alloy_core::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes, U256, keccak256},
};
use cascade_deploy::{
    Artifact, ArtifactResolver, ConfigurationOperation, ConfigurationPhase, DeployBackend,
    DeployError, DeploymentResult, MULTICALL3_ADDRESS, MemorySnapshotStore, Orchestrator, Pipeline,
    ProvisionStep, Receipt, RunSettings, Scope, SnapshotKey, SnapshotRecord, SnapshotStore,
    Transaction, TransactionExecutor, UnitDescriptor, UnitOverrides, VestingSettings,
    XnodeSettings, call,
    xnode::{
        self, PERMISSIONS_CONTEXT, VESTING_CONTEXT, XNODE_UNIT, XNODE_UNIT_ENTITLEMENT,
        XNODE_UNIT_ENTITLEMENT_CLAIMER, XNODE_UNITS_OPEN_VESTING,
    },
};

/// Hands out sequential addresses and records every provisioned unit.
struct RecordingBackend {
    next: AtomicU8,
    fail_role: Option<String>,
    provisioned: Mutex<Vec<(Scope, UnitDescriptor, Bytes)>>,
}

impl RecordingBackend {
    fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first: u8) -> Self {
        Self {
            next: AtomicU8::new(first),
            fail_role: None,
            provisioned: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(role: &str) -> Self {
        Self {
            fail_role: Some(role.to_string()),
            ..Self::new()
        }
    }

    fn provisioned(&self) -> Vec<(Scope, UnitDescriptor, Bytes)> {
        self.provisioned.lock().expect("lock").clone()
    }

    fn roles(&self) -> Vec<String> {
        self.provisioned()
            .into_iter()
            .map(|(_, unit, _)| unit.role)
            .collect()
    }
}

impl DeployBackend for RecordingBackend {
    async fn provision(
        &self,
        scope: &Scope,
        unit: &UnitDescriptor,
        creation_code: &Bytes,
    ) -> anyhow::Result<Address> {
        if self.fail_role.as_deref() == Some(unit.role.as_str()) {
            anyhow::bail!("out of gas while deploying {}", unit.kind);
        }

        let address = Address::with_last_byte(self.next.fetch_add(1, Ordering::SeqCst));
        self.provisioned.lock().expect("lock").push((
            scope.clone(),
            unit.clone(),
            creation_code.clone(),
        ));
        Ok(address)
    }
}

/// Serves fixed artifacts keyed by scope and kind.
#[derive(Default)]
struct StaticArtifacts {
    artifacts: HashMap<(Scope, String), Artifact>,
    lookups: Mutex<Vec<(Scope, String)>>,
}

impl StaticArtifacts {
    fn with(mut self, scope: Scope, kind: &str, abi: &[&str], bytecode: &'static [u8]) -> Self {
        let artifact = Artifact {
            kind: kind.to_string(),
            abi: JsonAbi::parse(abi.iter().copied()).expect("abi should parse"),
            bytecode: Bytes::from_static(bytecode),
        };
        self.artifacts.insert((scope, kind.to_string()), artifact);
        self
    }

    /// Artifacts of the Xnode units, with `AccessControl` only in the permissions context.
    fn xnode() -> Self {
        Self::default()
            .with(Scope::root(), "XnodeUnit", &[], &[0x60, 0x01])
            .with(
                Scope::root(),
                "XnodeUnitEntitlement",
                &["constructor(address xnodeUnit)"],
                &[0x60, 0x02],
            )
            .with(
                Scope::root(),
                "XnodeUnitEntitlementClaimer",
                &["constructor(address entitlement, address signer)"],
                &[0x60, 0x03],
            )
            .with(
                Scope::from_path(PERMISSIONS_CONTEXT),
                "AccessControl",
                &["function grantRole(bytes32 role, address account)"],
                &[],
            )
            .with(
                Scope::from_path(VESTING_CONTEXT),
                "MultiERC721TokenLinearERC20TransferVesting",
                &["constructor(address token, uint96 amount, uint64 start, uint64 duration, address collection)"],
                &[0x60, 0x04],
            )
    }

    fn lookups(&self) -> Vec<(Scope, String)> {
        self.lookups.lock().expect("lock").clone()
    }
}

impl ArtifactResolver for StaticArtifacts {
    async fn resolve(&self, scope: &Scope, kind: &str) -> anyhow::Result<Artifact> {
        self.lookups
            .lock()
            .expect("lock")
            .push((scope.clone(), kind.to_string()));

        self.artifacts
            .get(&(scope.clone(), kind.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no artifact for {kind} in {scope}"))
    }
}

/// Records every transaction sent, optionally reverting them.
#[derive(Default)]
struct RecordingExecutor {
    revert: bool,
    sent: Mutex<Vec<Transaction>>,
}

impl RecordingExecutor {
    fn reverting() -> Self {
        Self {
            revert: true,
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().expect("lock").clone()
    }
}

impl TransactionExecutor for RecordingExecutor {
    async fn send(&self, tx: &Transaction) -> anyhow::Result<Receipt> {
        let mut sent = self.sent.lock().expect("lock");
        sent.push(tx.clone());
        if self.revert {
            anyhow::bail!("execution reverted");
        }
        Ok(Receipt {
            transaction_hash: B256::with_last_byte(sent.len() as u8),
            block_number: Some(sent.len() as u64),
        })
    }
}

type TestOrchestrator =
    Orchestrator<RecordingBackend, StaticArtifacts, RecordingExecutor, MemorySnapshotStore>;

fn orchestrator(pipeline: Pipeline, backend: RecordingBackend) -> TestOrchestrator {
    Orchestrator::new(
        pipeline,
        backend,
        StaticArtifacts::xnode(),
        RecordingExecutor::default(),
        MemorySnapshotStore::new(),
    )
}

/// Xnode settings with the permissions phase enabled.
fn xnode_settings() -> XnodeSettings {
    XnodeSettings {
        grant_permissions: true,
        ..Default::default()
    }
}

fn xnode_pipeline() -> Pipeline {
    xnode::pipeline(&xnode_settings()).expect("valid pipeline")
}

fn settings(force_redeploy: Option<bool>) -> RunSettings {
    RunSettings {
        force_redeploy,
        ..Default::default()
    }
}

fn stored_deployment() -> DeploymentResult {
    [
        (XNODE_UNIT, Address::with_last_byte(0xa1)),
        (XNODE_UNIT_ENTITLEMENT, Address::with_last_byte(0xa2)),
        (XNODE_UNIT_ENTITLEMENT_CLAIMER, Address::with_last_byte(0xa3)),
    ]
    .into_iter()
    .map(|(role, address)| (role.to_string(), address))
    .collect()
}

fn mint_role() -> B256 {
    keccak256("MINT_ROLE")
}

#[tokio::test]
async fn test_fresh_run_provisions_in_order_and_saves() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());

    let deployment = orchestrator
        .run(&settings(None))
        .await
        .expect("deployment should succeed");

    assert_eq!(
        orchestrator.backend().roles(),
        [XNODE_UNIT, XNODE_UNIT_ENTITLEMENT, XNODE_UNIT_ENTITLEMENT_CLAIMER]
    );
    assert_eq!(deployment.len(), 3);
    assert_eq!(deployment.address(XNODE_UNIT), Some(Address::with_last_byte(1)));
    assert_eq!(deployment.address(XNODE_UNIT_ENTITLEMENT), Some(Address::with_last_byte(2)));
    assert_eq!(
        deployment.address(XNODE_UNIT_ENTITLEMENT_CLAIMER),
        Some(Address::with_last_byte(3))
    );

    let sent = orchestrator.executor().sent();
    assert_eq!(sent.len(), 1, "one configuration batch should be sent");
    assert_eq!(sent[0].to, MULTICALL3_ADDRESS);
    assert_eq!(sent[0].value, U256::ZERO);

    let record = orchestrator
        .snapshots()
        .get(&SnapshotKey::latest())
        .expect("snapshot should be saved");
    assert_eq!(record.deployment, deployment);
    assert_eq!(record.config_hash.len(), 64);
    assert_eq!(orchestrator.snapshots().len(), 1);
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_units_consume_earlier_identifiers() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());
    orchestrator.run(&settings(None)).await.expect("deployment should succeed");

    let provisioned = orchestrator.backend().provisioned();

    let (_, entitlement, code) = &provisioned[1];
    assert_eq!(
        entitlement.init_args,
        vec![DynSolValue::Address(Address::with_last_byte(1))]
    );
    assert_eq!(code.len(), 2 + 32, "bytecode followed by one encoded address");
    assert_eq!(&code[..2], &[0x60, 0x02]);
    assert_eq!(code[33], 1);

    let (_, claimer, _) = &provisioned[2];
    assert_eq!(
        claimer.init_args,
        vec![
            DynSolValue::Address(Address::with_last_byte(2)),
            DynSolValue::Address(xnode::DEFAULT_CLAIMER_SIGNER),
        ]
    );
}

#[tokio::test]
async fn test_existing_snapshot_is_reused_without_side_effects() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());
    let record = SnapshotRecord::new(stored_deployment(), "stale-hash".to_string());
    orchestrator
        .snapshots()
        .save(&SnapshotKey::latest(), &record)
        .await
        .expect("save");

    let deployment = orchestrator
        .run(&settings(Some(false)))
        .await
        .expect("reuse should succeed");

    assert_eq!(deployment, stored_deployment());
    assert!(orchestrator.backend().provisioned().is_empty());
    assert!(orchestrator.artifacts().lookups().is_empty());
    assert!(orchestrator.executor().sent().is_empty());
    assert_eq!(
        orchestrator.snapshots().get(&SnapshotKey::latest()),
        Some(record),
        "stored snapshot should be left untouched"
    );
}

#[tokio::test]
async fn test_reuse_without_snapshot_deploys() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());

    let deployment = orchestrator
        .run(&settings(Some(false)))
        .await
        .expect("deployment should succeed");

    assert_eq!(deployment.len(), 3);
    assert_eq!(orchestrator.snapshots().len(), 1);
}

#[tokio::test]
async fn test_forced_or_unset_redeploy_overwrites_snapshot() {
    for force_redeploy in [Some(true), None] {
        let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::starting_at(0x10));
        orchestrator
            .snapshots()
            .insert(
                SnapshotKey::latest(),
                SnapshotRecord::new(stored_deployment(), "old".to_string()),
            );

        let deployment = orchestrator
            .run(&settings(force_redeploy))
            .await
            .expect("redeploy should succeed");

        assert_eq!(orchestrator.backend().provisioned().len(), 3);
        assert_eq!(deployment.address(XNODE_UNIT), Some(Address::with_last_byte(0x10)));

        let record = orchestrator
            .snapshots()
            .get(&SnapshotKey::latest())
            .expect("snapshot should exist");
        assert_eq!(record.deployment, deployment);
        assert_ne!(record.deployment, stored_deployment());
        assert_ne!(record.config_hash, "old");
    }
}

#[tokio::test]
async fn test_provisioning_failure_saves_nothing() {
    let mut orchestrator = orchestrator(
        xnode_pipeline(),
        RecordingBackend::failing_on(XNODE_UNIT_ENTITLEMENT),
    );

    let err = orchestrator
        .run(&settings(None))
        .await
        .expect_err("second unit should fail");

    match err {
        DeployError::Provisioning { role, kind, source } => {
            assert_eq!(role, XNODE_UNIT_ENTITLEMENT);
            assert_eq!(kind, "XnodeUnitEntitlement");
            assert!(source.to_string().contains("out of gas"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(orchestrator.backend().roles(), [XNODE_UNIT], "first unit was provisioned");
    assert!(orchestrator.executor().sent().is_empty());
    assert!(orchestrator.snapshots().is_empty());
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_configuration_batch_preserves_operation_order() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());
    let deployment = orchestrator
        .run(&settings(None))
        .await
        .expect("deployment should succeed");

    let sent = orchestrator.executor().sent();
    let calls = call::decode_batch(&sent[0].data).expect("batch should decode");
    assert_eq!(calls.len(), 2);

    let expected = [
        (XNODE_UNIT, XNODE_UNIT_ENTITLEMENT),
        (XNODE_UNIT_ENTITLEMENT, XNODE_UNIT_ENTITLEMENT_CLAIMER),
    ];
    for (decoded, (target, grantee)) in calls.iter().zip(expected) {
        assert_eq!(Some(decoded.target), deployment.address(target));
        assert!(!decoded.allow_failure);
        assert_eq!(decoded.value, U256::ZERO);

        let data = &decoded.calldata;
        assert_eq!(data.len(), 4 + 2 * 32);
        assert_eq!(&data[..4], &keccak256("grantRole(bytes32,address)")[..4]);
        assert_eq!(&data[4..36], mint_role().as_slice());
        assert_eq!(
            &data[48..68],
            deployment.address(grantee).expect("grantee").as_slice()
        );
    }

    assert!(
        orchestrator
            .artifacts()
            .lookups()
            .contains(&(Scope::from_path(PERMISSIONS_CONTEXT), "AccessControl".to_string())),
        "interface should be resolved inside the phase context"
    );
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_reverted_batch_closes_context_and_saves_nothing() {
    let mut orchestrator = Orchestrator::new(
        xnode_pipeline(),
        RecordingBackend::new(),
        StaticArtifacts::xnode(),
        RecordingExecutor::reverting(),
        MemorySnapshotStore::new(),
    );

    let err = orchestrator
        .run(&settings(None))
        .await
        .expect_err("batch should revert");

    assert!(matches!(err, DeployError::Execution { ref phase, .. } if phase == "permissions"));
    assert_eq!(orchestrator.executor().sent().len(), 1);
    assert_eq!(orchestrator.backend().provisioned().len(), 3);
    assert!(orchestrator.snapshots().is_empty());
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_missing_interface_is_a_resolution_error() {
    let artifacts = StaticArtifacts::default()
        .with(Scope::root(), "XnodeUnit", &[], &[0x60, 0x01])
        .with(
            Scope::root(),
            "XnodeUnitEntitlement",
            &["constructor(address xnodeUnit)"],
            &[0x60, 0x02],
        )
        .with(
            Scope::root(),
            "XnodeUnitEntitlementClaimer",
            &["constructor(address entitlement, address signer)"],
            &[0x60, 0x03],
        )
        // Available at the root only, never inside the permissions context.
        .with(
            Scope::root(),
            "AccessControl",
            &["function grantRole(bytes32 role, address account)"],
            &[],
        );

    let mut orchestrator = Orchestrator::new(
        xnode_pipeline(),
        RecordingBackend::new(),
        artifacts,
        RecordingExecutor::default(),
        MemorySnapshotStore::new(),
    );

    let err = orchestrator
        .run(&settings(None))
        .await
        .expect_err("interface should not resolve");

    match err {
        DeployError::Resolution { kind, scope, .. } => {
            assert_eq!(kind, "AccessControl");
            assert_eq!(scope, Scope::from_path(PERMISSIONS_CONTEXT));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(orchestrator.executor().sent().is_empty());
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_encoding_error_sends_nothing() {
    let pipeline = Pipeline::builder()
        .then(ProvisionStep::new(XNODE_UNIT, "XnodeUnit"))
        .then(
            ConfigurationPhase::new("permissions", PERMISSIONS_CONTEXT).operation(
                ConfigurationOperation::new(XNODE_UNIT, "grantRole")
                    .interface("AccessControl")
                    .arg(cascade_deploy::Arg::address(Address::with_last_byte(1)))
                    .arg(cascade_deploy::Arg::role(XNODE_UNIT)),
            ),
        )
        .build()
        .expect("valid pipeline");
    let mut orchestrator = orchestrator(pipeline, RecordingBackend::new());

    let err = orchestrator
        .run(&settings(None))
        .await
        .expect_err("address is not a bytes32");

    assert!(matches!(err, DeployError::Encoding { .. }), "unexpected error: {err}");
    assert!(orchestrator.executor().sent().is_empty());
    assert!(orchestrator.snapshots().is_empty());
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_vesting_is_provisioned_in_its_context() {
    let pipeline = xnode::pipeline(&XnodeSettings {
        vesting: Some(VestingSettings::default()),
        ..xnode_settings()
    })
    .expect("valid pipeline");
    let mut orchestrator = orchestrator(pipeline, RecordingBackend::new());

    let deployment = orchestrator
        .run(&settings(None))
        .await
        .expect("deployment should succeed");

    let provisioned = orchestrator.backend().provisioned();
    let (scope, vesting, code) = provisioned.last().expect("vesting unit");
    assert_eq!(vesting.role, XNODE_UNITS_OPEN_VESTING);
    assert_eq!(scope, &Scope::from_path(VESTING_CONTEXT));
    assert_eq!(code.len(), 2 + 5 * 32);
    assert_eq!(
        vesting.init_args.last(),
        Some(&DynSolValue::Address(
            deployment.address(XNODE_UNIT).expect("xnodeUnit")
        ))
    );
    assert_eq!(deployment.len(), 4);
    assert_eq!(orchestrator.context_depth(), 0);
}

#[tokio::test]
async fn test_vesting_failure_closes_its_context() {
    let pipeline = xnode::pipeline(&XnodeSettings {
        vesting: Some(VestingSettings::default()),
        ..xnode_settings()
    })
    .expect("valid pipeline");
    let mut orchestrator = orchestrator(
        pipeline,
        RecordingBackend::failing_on(XNODE_UNITS_OPEN_VESTING),
    );

    let err = orchestrator
        .run(&settings(None))
        .await
        .expect_err("vesting unit should fail");

    match &err {
        DeployError::Provisioning { role, .. } => assert_eq!(role, XNODE_UNITS_OPEN_VESTING),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.context_depth(), 0);
    assert!(orchestrator.snapshots().is_empty());
    assert_eq!(
        orchestrator.backend().roles(),
        [XNODE_UNIT, XNODE_UNIT_ENTITLEMENT, XNODE_UNIT_ENTITLEMENT_CLAIMER]
    );
    assert_eq!(orchestrator.executor().sent().len(), 1, "permissions ran before vesting");
}

#[tokio::test]
async fn test_default_xnode_run_sends_no_batch() {
    let pipeline = xnode::pipeline(&XnodeSettings::default()).expect("valid pipeline");
    let mut orchestrator = orchestrator(pipeline, RecordingBackend::new());

    let deployment = orchestrator
        .run(&settings(None))
        .await
        .expect("deployment should succeed");

    assert_eq!(deployment.len(), 3);
    assert!(orchestrator.executor().sent().is_empty());
    assert!(
        orchestrator
            .artifacts()
            .lookups()
            .iter()
            .all(|(_, kind)| kind != "AccessControl")
    );
}

#[tokio::test]
async fn test_batch_is_sent_from_caller_to_aggregator() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());
    let caller = Address::with_last_byte(0xcc);
    let aggregator = Address::with_last_byte(0xaa);
    let settings = RunSettings {
        caller: Some(caller),
        aggregator,
        ..settings(None)
    };

    let deployment = orchestrator
        .run(&settings)
        .await
        .expect("deployment should succeed");

    let sent = orchestrator.executor().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, Some(caller));
    assert_eq!(sent[0].to, aggregator, "batch goes to the configured aggregator");

    // The units are called by the aggregator, never by the caller directly.
    let calls = call::decode_batch(&sent[0].data).expect("batch should decode");
    assert!(calls.iter().all(|c| c.target != caller && c.target != aggregator));
    assert_eq!(Some(calls[0].target), deployment.address(XNODE_UNIT));
}

#[tokio::test]
async fn test_caller_overrides_reach_the_backend() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());
    let mut settings = settings(None);
    settings.caller = Some(Address::with_last_byte(0xcc));
    settings.units.insert(
        XNODE_UNIT.to_string(),
        UnitOverrides {
            gas: Some(6_000_000),
            ..Default::default()
        },
    );

    orchestrator.run(&settings).await.expect("deployment should succeed");

    let provisioned = orchestrator.backend().provisioned();
    assert_eq!(provisioned[0].1.overrides.gas, Some(6_000_000));
    assert_eq!(provisioned[1].1.overrides, UnitOverrides::default());
    assert_eq!(
        orchestrator.executor().sent()[0].from,
        Some(Address::with_last_byte(0xcc))
    );
}

#[tokio::test]
async fn test_preview_builds_batches_without_sending() {
    let mut orchestrator = orchestrator(xnode_pipeline(), RecordingBackend::new());

    let batches = orchestrator
        .preview(&RunSettings::default(), &stored_deployment())
        .await
        .expect("preview should succeed");

    assert_eq!(batches.len(), 1);
    let (phase, tx) = &batches[0];
    assert_eq!(phase, "permissions");
    assert_eq!(tx.to, MULTICALL3_ADDRESS);

    let calls = call::decode_batch(&tx.data).expect("batch should decode");
    assert_eq!(calls[0].target, Address::with_last_byte(0xa1));
    assert_eq!(calls[1].target, Address::with_last_byte(0xa2));

    assert!(orchestrator.executor().sent().is_empty());
    assert!(orchestrator.backend().provisioned().is_empty());
    assert_eq!(orchestrator.context_depth(), 0);
}

#[test]
fn test_misordered_pipeline_is_rejected() {
    let result = Pipeline::builder()
        .then(
            ProvisionStep::new(XNODE_UNIT_ENTITLEMENT, "XnodeUnitEntitlement")
                .arg(cascade_deploy::Arg::role(XNODE_UNIT)),
        )
        .then(ProvisionStep::new(XNODE_UNIT, "XnodeUnit"))
        .build();

    assert!(matches!(result, Err(DeployError::Pipeline { .. })));
}
