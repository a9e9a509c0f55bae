//! Collaborators performing the external side effects of a run.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};

use crate::{context::Scope, unit::UnitDescriptor};

/// Provisions units and returns their identifiers.
pub trait DeployBackend: Send + Sync {
    /// Provision `unit` from `creation_code` (bytecode followed by encoded constructor
    /// arguments). Never returns a partial identifier: either the unit exists at the
    /// returned address or the call fails.
    fn provision(
        &self,
        scope: &Scope,
        unit: &UnitDescriptor,
        creation_code: &Bytes,
    ) -> impl Future<Output = anyhow::Result<Address>> + Send;
}

/// A call to send on behalf of a caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Sender. Falls back to the executor's default account when unset.
    pub from: Option<Address>,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<u64>,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
}

/// Sends transactions and waits for them to be mined.
pub trait TransactionExecutor: Send + Sync {
    /// Fails if the transaction is rejected or reverts.
    fn send(&self, tx: &Transaction) -> impl Future<Output = anyhow::Result<Receipt>> + Send;
}
