use crate::models::{TransactionId, TransferEvent};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a payment was refused. These are stable outcomes for a given chain
/// state, not failures of the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionCode {
    AlreadyUsed,
    NotFound,
    WrongContract,
    PendingOrMissing,
    ExecutionReverted,
    InsufficientConfirmations,
    InsufficientAmount,
    NoMatchingTransfer,
}

impl RejectionCode {
    /// Only these depend on time passing; everything else will be rejected
    /// the same way on every attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RejectionCode::PendingOrMissing | RejectionCode::InsufficientConfirmations
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectionCode::AlreadyUsed => "AlreadyUsed",
            RejectionCode::NotFound => "NotFound",
            RejectionCode::WrongContract => "WrongContract",
            RejectionCode::PendingOrMissing => "PendingOrMissing",
            RejectionCode::ExecutionReverted => "ExecutionReverted",
            RejectionCode::InsufficientConfirmations => "InsufficientConfirmations",
            RejectionCode::InsufficientAmount => "InsufficientAmount",
            RejectionCode::NoMatchingTransfer => "NoMatchingTransfer",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: RejectionCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Facts gathered while verifying. Fields stay `None` when the check that
/// would have filled them never ran, or when the chain could not tell us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationDetails {
    pub tx_hash: TransactionId,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub block_height: Option<u64>,
    /// `None` means unknown, never zero.
    pub confirmations: Option<u64>,
    pub transfer: Option<TransferEvent>,
    /// Smallest units, decimal.
    pub transferred_amount: Option<String>,
    pub amount_display: Option<String>,
    pub recipient_checked: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub marked_used: bool,
}

impl VerificationDetails {
    pub fn new(tx_hash: TransactionId) -> Self {
        Self {
            tx_hash,
            from: None,
            to: None,
            block_height: None,
            confirmations: None,
            transfer: None,
            transferred_amount: None,
            amount_display: None,
            recipient_checked: true,
            verified_at: None,
            marked_used: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub error: Option<Rejection>,
    pub details: VerificationDetails,
}

impl VerificationResult {
    pub fn accepted(details: VerificationDetails) -> Self {
        Self {
            valid: true,
            error: None,
            details,
        }
    }

    pub fn rejected(rejection: Rejection, details: VerificationDetails) -> Self {
        Self {
            valid: false,
            error: Some(rejection),
            details,
        }
    }

    pub fn rejection_code(&self) -> Option<RejectionCode> {
        self.error.as_ref().map(|r| r.code)
    }
}
