//! Read-only access to the ledger node over JSON-RPC.
//!
//! Every call is bounded by the configured timeout. A `null` result from the
//! node is an absent value (`Ok(None)`); anything that goes wrong on the way
//! is an error and is never reported as "not found".

use crate::{error::GateError, models::TransactionId};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Provider, ProviderError, RpcError},
    types::{Address, Bytes, H256, U64},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// A transaction as seen by the node, reduced to what verification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// `None` while the transaction is still pending.
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub succeeded: bool,
    pub logs: Vec<ReceiptLog>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_transaction(&self, tx: &TransactionId)
        -> Result<Option<ChainTransaction>, GateError>;

    async fn get_receipt(&self, tx: &TransactionId) -> Result<Option<ChainReceipt>, GateError>;

    async fn current_height(&self) -> Result<u64, GateError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    #[serde(default)]
    block_number: Option<U64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcReceipt {
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcLog {
    address: Address,
    #[serde(default)]
    topics: Vec<H256>,
    #[serde(default)]
    data: Bytes,
}

impl From<RpcTransaction> for ChainTransaction {
    fn from(raw: RpcTransaction) -> Self {
        Self {
            from: raw.from,
            to: raw.to,
            block_number: raw.block_number.map(|n| n.as_u64()),
        }
    }
}

impl From<RpcReceipt> for ChainReceipt {
    fn from(raw: RpcReceipt) -> Self {
        Self {
            // Receipts without a status field predate it; treat them as failed.
            succeeded: raw.status == Some(U64::one()),
            logs: raw
                .logs
                .into_iter()
                .map(|log| ReceiptLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        }
    }
}

/// [`LedgerClient`] backed by an ethers HTTP provider.
pub struct EthereumLedgerClient {
    provider: Provider<Http>,
    timeout: Duration,
}

impl EthereumLedgerClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, GateError> {
        let url = reqwest::Url::parse(rpc_url)
            .map_err(|e| GateError::ConfigError(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::ConfigError(format!("HTTP client: {}", e)))?;

        let provider = Provider::new(Http::new_with_client(url, client));

        Ok(Self { provider, timeout })
    }

    async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, GateError>
    where
        P: Debug + Serialize + Send + Sync,
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        tracing::debug!("RPC {} {:?}", method, params);

        match tokio::time::timeout(self.timeout, self.provider.request(method, params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(classify_provider_error(method, e)),
            Err(_) => Err(GateError::NodeUnavailable(format!(
                "{} timed out after {:?}",
                method, self.timeout
            ))),
        }
    }
}

fn classify_provider_error(method: &str, err: ProviderError) -> GateError {
    if let Some(serde_err) = err.as_serde_error() {
        return GateError::MalformedResponse(format!("{}: {}", method, serde_err));
    }
    if let Some(rpc_err) = err.as_error_response() {
        return GateError::NodeUnavailable(format!("{} rejected by node: {}", method, rpc_err));
    }
    GateError::NodeUnavailable(format!("{}: {}", method, err))
}

#[async_trait]
impl LedgerClient for EthereumLedgerClient {
    async fn get_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<ChainTransaction>, GateError> {
        let raw: Option<RpcTransaction> = self
            .call("eth_getTransactionByHash", [tx.as_h256()])
            .await?;
        Ok(raw.map(Into::into))
    }

    async fn get_receipt(&self, tx: &TransactionId) -> Result<Option<ChainReceipt>, GateError> {
        let raw: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", [tx.as_h256()])
            .await?;
        Ok(raw.map(Into::into))
    }

    async fn current_height(&self) -> Result<u64, GateError> {
        let height: U64 = self.call("eth_blockNumber", ()).await?;
        Ok(height.as_u64())
    }
}
