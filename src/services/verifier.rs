//! The accept/reject decision for a registration payment.
//!
//! Verification runs a fixed sequence of named checks ([`Check::ORDER`]).
//! The first check that rejects ends the run with its reason; errors from the
//! node or the payment ledger abort the run and are returned as `Err`, never
//! folded into a rejection.

use crate::{
    error::GateError,
    models::{
        format_token_amount, RecordOutcome, Rejection, RejectionCode, TransactionId,
        TransferEvent, VerificationDetails, VerificationResult,
    },
    services::{
        ledger_client::{ChainReceipt, LedgerClient, ReceiptLog},
        transfer_log::decode_transfer,
        PaymentLedger,
    },
};
use chrono::Utc;
use ethers::types::{Address, H160, U256};
use std::sync::Arc;

/// USDC on Base.
pub const DEFAULT_TOKEN_CONTRACT: Address = H160([
    0x83, 0x35, 0x89, 0xfc, 0xd6, 0xed, 0xb6, 0xe0, 0x8f, 0x4c, 0x7c, 0x32, 0xd4, 0xf7, 0x1b, 0x54,
    0xbd, 0xa0, 0x29, 0x13,
]);
pub const DEFAULT_TREASURY: Address = H160([
    0x3e, 0x98, 0xb8, 0x23, 0x66, 0x8d, 0x07, 0x5a, 0x37, 0x12, 0x12, 0xea, 0xfa, 0x06, 0x9a, 0x24,
    0x04, 0xe7, 0xde, 0xfb,
]);
pub const DEFAULT_TOKEN_DECIMALS: u32 = 6;
/// 1 USDC in smallest units.
pub const DEFAULT_ENTRY_FEE: u64 = 1_000_000;
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 12;

/// Who a qualifying transfer must pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientPolicy {
    Treasury(Address),
    /// Any recipient is accepted. Only reachable through an explicit opt-in.
    Unchecked,
}

impl RecipientPolicy {
    /// The all-zero address is the "skip recipient check" sentinel and is
    /// refused unless the deployment opted in.
    pub fn from_configured(treasury: Address, allow_unchecked: bool) -> Result<Self, GateError> {
        if !treasury.is_zero() {
            return Ok(RecipientPolicy::Treasury(treasury));
        }
        if !allow_unchecked {
            return Err(GateError::ConfigError(
                "treasury address is the zero sentinel; set ALLOW_UNCHECKED_RECIPIENT=true to \
                 accept payments to any recipient"
                    .to_string(),
            ));
        }
        tracing::warn!("Treasury address not set. Recipient checks are DISABLED.");
        Ok(RecipientPolicy::Unchecked)
    }

    fn accepts(&self, recipient: Address) -> bool {
        match self {
            RecipientPolicy::Treasury(treasury) => *treasury == recipient,
            RecipientPolicy::Unchecked => true,
        }
    }
}

/// Deployment policy, fixed at construction.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub token_contract: Address,
    pub token_decimals: u32,
    pub token_symbol: String,
    pub recipient: RecipientPolicy,
    /// Smallest units.
    pub min_entry_fee: U256,
    pub min_confirmations: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            token_contract: DEFAULT_TOKEN_CONTRACT,
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            token_symbol: "USDC".to_string(),
            recipient: RecipientPolicy::Treasury(DEFAULT_TREASURY),
            min_entry_fee: U256::from(DEFAULT_ENTRY_FEE),
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
        }
    }
}

impl VerifierConfig {
    fn display_amount(&self, amount: U256) -> String {
        format_token_amount(amount, self.token_decimals)
    }
}

/// The verification steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    NotAlreadyUsed,
    TransactionExists,
    TargetsTokenContract,
    ReceiptAvailable,
    ExecutionSucceeded,
    ConfirmationDepth,
    MatchingTransfer,
}

impl Check {
    pub const ORDER: [Check; 7] = [
        Check::NotAlreadyUsed,
        Check::TransactionExists,
        Check::TargetsTokenContract,
        Check::ReceiptAvailable,
        Check::ExecutionSucceeded,
        Check::ConfirmationDepth,
        Check::MatchingTransfer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Check::NotAlreadyUsed => "not_already_used",
            Check::TransactionExists => "transaction_exists",
            Check::TargetsTokenContract => "targets_token_contract",
            Check::ReceiptAvailable => "receipt_available",
            Check::ExecutionSucceeded => "execution_succeeded",
            Check::ConfirmationDepth => "confirmation_depth",
            Check::MatchingTransfer => "matching_transfer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Reject(Rejection),
}

fn reject(code: RejectionCode, message: impl Into<String>) -> Outcome {
    Outcome::Reject(Rejection::new(code, message))
}

fn already_used() -> Rejection {
    Rejection::new(
        RejectionCode::AlreadyUsed,
        "Transaction already used for another registration",
    )
}

/// State carried from one check to the next.
struct Verification {
    details: VerificationDetails,
    receipt: Option<ChainReceipt>,
}

pub struct PaymentVerifier {
    chain: Arc<dyn LedgerClient>,
    ledger: Arc<dyn PaymentLedger>,
    config: VerifierConfig,
}

impl PaymentVerifier {
    pub fn new(
        chain: Arc<dyn LedgerClient>,
        ledger: Arc<dyn PaymentLedger>,
        config: VerifierConfig,
    ) -> Self {
        tracing::info!(
            "Payment verifier initialized \
             (token={:?}, fee={}, min_confirmations={}, recipient={:?})",
            config.token_contract,
            config.min_entry_fee,
            config.min_confirmations,
            config.recipient
        );

        Self {
            chain,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn PaymentLedger> {
        &self.ledger
    }

    pub fn chain(&self) -> &Arc<dyn LedgerClient> {
        &self.chain
    }

    /// Verify a payment given as text. Malformed ids fail before any I/O.
    pub async fn verify(
        &self,
        tx_hash: &str,
        claimant: Option<&str>,
        record: bool,
    ) -> Result<VerificationResult, GateError> {
        let tx = TransactionId::parse(tx_hash)?;
        self.verify_id(tx, claimant, record).await
    }

    /// Verify a payment and, if `record` is set and a claimant is given,
    /// consume it in the payment ledger.
    pub async fn verify_id(
        &self,
        tx: TransactionId,
        claimant: Option<&str>,
        record: bool,
    ) -> Result<VerificationResult, GateError> {
        let mut state = Verification {
            details: VerificationDetails::new(tx),
            receipt: None,
        };

        for check in Check::ORDER {
            if let Outcome::Reject(rejection) = self.run_check(check, &mut state).await? {
                tracing::debug!(
                    "Payment {} rejected at {}: {}",
                    tx,
                    check.name(),
                    rejection
                );
                return Ok(VerificationResult::rejected(rejection, state.details));
            }
        }

        let mut details = state.details;

        if record {
            match claimant {
                Some(claimant) => match self.ledger.record(&tx, claimant).await? {
                    RecordOutcome::Recorded => details.marked_used = true,
                    RecordOutcome::AlreadyRecorded => {
                        tracing::warn!("Payment {} was consumed concurrently", tx);
                        return Ok(VerificationResult::rejected(already_used(), details));
                    }
                },
                None => tracing::warn!(
                    "Payment {} verified but not recorded: no claimant supplied",
                    tx
                ),
            }
        }
        details.verified_at = Some(Utc::now());

        tracing::info!(
            "Payment verified: {} {} from {:?} (tx: {}, marked_used: {})",
            details.amount_display.as_deref().unwrap_or("?"),
            self.config.token_symbol,
            details.from,
            tx,
            details.marked_used
        );

        Ok(VerificationResult::accepted(details))
    }

    async fn run_check(
        &self,
        check: Check,
        state: &mut Verification,
    ) -> Result<Outcome, GateError> {
        let tx = state.details.tx_hash;

        match check {
            Check::NotAlreadyUsed => {
                if self.ledger.contains(&tx).await? {
                    Ok(Outcome::Reject(already_used()))
                } else {
                    Ok(Outcome::Pass)
                }
            }

            Check::TransactionExists => match self.chain.get_transaction(&tx).await? {
                Some(transaction) => {
                    state.details.from = Some(transaction.from);
                    state.details.to = transaction.to;
                    state.details.block_height = transaction.block_number;
                    Ok(Outcome::Pass)
                }
                None => Ok(reject(RejectionCode::NotFound, "Transaction not found")),
            },

            Check::TargetsTokenContract => Ok(check_token_contract(
                state.details.to,
                &self.config,
            )),

            Check::ReceiptAvailable => match self.chain.get_receipt(&tx).await? {
                Some(receipt) => {
                    state.receipt = Some(receipt);
                    Ok(Outcome::Pass)
                }
                None => Ok(reject(
                    RejectionCode::PendingOrMissing,
                    "Transaction receipt not found (pending?)",
                )),
            },

            Check::ExecutionSucceeded => Ok(check_execution(state.receipt.as_ref())),

            Check::ConfirmationDepth => {
                let Some(block) = state.details.block_height else {
                    tracing::warn!(
                        "Block height unknown for {}; confirmations not enforced",
                        tx
                    );
                    return Ok(Outcome::Pass);
                };

                let current = self.chain.current_height().await?;
                let confirmations = current.saturating_sub(block);
                state.details.confirmations = Some(confirmations);
                Ok(check_confirmations(confirmations, self.config.min_confirmations))
            }

            Check::MatchingTransfer => {
                state.details.recipient_checked =
                    self.config.recipient != RecipientPolicy::Unchecked;
                if !state.details.recipient_checked {
                    tracing::warn!("Treasury address not set. Skipping recipient check.");
                }

                let logs = state
                    .receipt
                    .as_ref()
                    .map(|r| r.logs.as_slice())
                    .unwrap_or(&[]);

                match find_treasury_transfer(logs, &self.config) {
                    Some(transfer) => {
                        state.details.transfer = Some(transfer);
                        state.details.transferred_amount = Some(transfer.amount.to_string());
                        state.details.amount_display =
                            Some(self.config.display_amount(transfer.amount));
                        Ok(check_amount(transfer.amount, &self.config))
                    }
                    None => Ok(reject(
                        RejectionCode::NoMatchingTransfer,
                        format!(
                            "No valid {} transfer to treasury found in transaction",
                            self.config.token_symbol
                        ),
                    )),
                }
            }
        }
    }
}

/// A payment is a call into the token contract, not a plain value transfer.
pub fn check_token_contract(to: Option<Address>, config: &VerifierConfig) -> Outcome {
    if to == Some(config.token_contract) {
        return Outcome::Pass;
    }

    let target = to
        .map(|a| format!("{:?}", a))
        .unwrap_or_else(|| "contract creation".to_string());
    reject(
        RejectionCode::WrongContract,
        format!(
            "Transaction is not to {} contract. To: {}",
            config.token_symbol, target
        ),
    )
}

pub fn check_execution(receipt: Option<&ChainReceipt>) -> Outcome {
    match receipt {
        Some(r) if r.succeeded => Outcome::Pass,
        Some(_) => reject(
            RejectionCode::ExecutionReverted,
            "Transaction failed (reverted)",
        ),
        None => reject(
            RejectionCode::PendingOrMissing,
            "Transaction receipt not found (pending?)",
        ),
    }
}

pub fn check_confirmations(confirmations: u64, required: u64) -> Outcome {
    if confirmations >= required {
        return Outcome::Pass;
    }
    reject(
        RejectionCode::InsufficientConfirmations,
        format!(
            "Insufficient confirmations: {} < {}",
            confirmations, required
        ),
    )
}

/// The first transfer emitted by the token contract to an acceptable
/// recipient. Later transfers are never considered, and amounts are never
/// summed.
pub fn find_treasury_transfer(
    logs: &[ReceiptLog],
    config: &VerifierConfig,
) -> Option<TransferEvent> {
    logs.iter()
        .filter(|log| log.address == config.token_contract)
        .filter_map(decode_transfer)
        .find(|transfer| config.recipient.accepts(transfer.to))
}

/// Raw smallest-unit comparison; the display strings only feed the message.
pub fn check_amount(amount: U256, config: &VerifierConfig) -> Outcome {
    if amount >= config.min_entry_fee {
        return Outcome::Pass;
    }
    reject(
        RejectionCode::InsufficientAmount,
        format!(
            "Insufficient amount: {} {} < {} {}",
            config.display_amount(amount),
            config.token_symbol,
            config.display_amount(config.min_entry_fee),
            config.token_symbol
        ),
    )
}
