use crate::models::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub ledger_node: bool,
    pub block_height: Option<u64>,
    pub payment_ledger: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyRequest {
    pub tx_hash: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub mark_used: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymentUsage {
    pub tx_hash: TransactionId,
    pub used: bool,
}
