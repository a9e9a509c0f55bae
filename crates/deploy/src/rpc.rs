//! JSON-RPC backend deploying units and sending configuration batches.
//!
//! Targets nodes that sign for unlocked accounts (anvil, dev nodes): transactions are
//! submitted with `eth_sendTransaction` and their receipts polled until mined.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    backend::{DeployBackend, Receipt, Transaction, TransactionExecutor},
    context::Scope,
    unit::UnitDescriptor,
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of receipt polls before giving up on a transaction.
const DEFAULT_RECEIPT_POLLS: usize = 30;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: B256,
    block_number: Option<U64>,
    status: Option<U64>,
    contract_address: Option<Address>,
}

impl TransactionReceipt {
    fn ensure_success(&self) -> anyhow::Result<()> {
        match self.status {
            Some(status) if status.is_zero() => {
                anyhow::bail!("Transaction {} reverted", self.transaction_hash)
            }
            _ => Ok(()),
        }
    }

    fn into_receipt(self) -> Receipt {
        Receipt {
            transaction_hash: self.transaction_hash,
            block_number: self.block_number.map(|n| n.to::<u64>()),
        }
    }
}

/// JSON-RPC client implementing both [`DeployBackend`] and [`TransactionExecutor`].
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
    default_from: Option<Address>,
    receipt_polls: usize,
    poll_interval: Duration,
}

impl RpcClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(url).context(format!("Invalid RPC URL: {url}"))?;
        Ok(Self {
            client: create_client()?,
            url,
            default_from: None,
            receipt_polls: DEFAULT_RECEIPT_POLLS,
            poll_interval: Duration::from_millis(500),
        })
    }

    /// Account used when a unit or transaction does not name its sender.
    pub fn with_default_from(mut self, from: Option<Address>) -> Self {
        self.default_from = from;
        self
    }

    pub fn with_receipt_polling(mut self, polls: usize, interval: Duration) -> Self {
        self.receipt_polls = polls;
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    fn sender(&self, from: Option<Address>) -> anyhow::Result<Address> {
        from.or(self.default_from)
            .context("No sender account configured for the transaction")
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: &Bytes,
        gas: Option<u64>,
    ) -> anyhow::Result<TransactionReceipt> {
        let mut request = serde_json::json!({
            "from": from,
            "value": value,
            "data": data,
        });
        if let Some(to) = to {
            request["to"] = serde_json::json!(to);
        }
        if let Some(gas) = gas {
            request["gas"] = serde_json::json!(format!("0x{gas:x}"));
        }

        let hash: B256 = self
            .call("eth_sendTransaction", vec![request])
            .await
            .context("Failed to send transaction")?;

        tracing::debug!(tx_hash = %hash, %from, ?to, "Transaction sent");

        self.wait_for_receipt(hash).await
    }

    async fn wait_for_receipt(&self, hash: B256) -> anyhow::Result<TransactionReceipt> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.poll_interval)
            .with_max_delay(self.poll_interval * 8)
            .with_max_times(self.receipt_polls);

        (|| async move {
            let receipt: Option<TransactionReceipt> = self
                .call("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
                .await?;
            receipt.with_context(|| format!("Transaction {hash} is still pending"))
        })
        .retry(backoff)
        .notify(|err: &anyhow::Error, after: Duration| {
            tracing::trace!(error = %err, ?after, "Receipt not available, retrying...");
        })
        .await
        .with_context(|| format!("Timeout waiting for receipt of {hash}"))
    }
}

impl DeployBackend for RpcClient {
    async fn provision(
        &self,
        scope: &Scope,
        unit: &UnitDescriptor,
        creation_code: &Bytes,
    ) -> anyhow::Result<Address> {
        let from = self.sender(unit.overrides.from)?;

        tracing::debug!(
            role = %unit.role,
            kind = %unit.kind,
            scope = %scope,
            %from,
            code_size = creation_code.len(),
            "Sending deployment transaction"
        );

        let receipt = self
            .send_transaction(
                from,
                None,
                unit.overrides.value.unwrap_or_default(),
                creation_code,
                unit.overrides.gas,
            )
            .await?;
        receipt.ensure_success()?;

        receipt
            .contract_address
            .context(format!("Receipt {} has no contract address", receipt.transaction_hash))
    }
}

impl TransactionExecutor for RpcClient {
    async fn send(&self, tx: &Transaction) -> anyhow::Result<Receipt> {
        let from = self.sender(tx.from)?;
        let receipt = self
            .send_transaction(from, Some(tx.to), tx.value, &tx.data, tx.gas)
            .await?;
        receipt.ensure_success()?;
        Ok(receipt.into_receipt())
    }
}
