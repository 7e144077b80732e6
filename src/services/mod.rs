pub mod batch;
pub mod ledger_client;
pub mod redis_ledger;
pub mod transfer_log;
pub mod used_payments;
pub mod verifier;

#[cfg(test)]
pub(crate) mod mock_chain;

pub use batch::{BatchConfig, BatchReport, BatchVerifier, PendingRegistration};
pub use ledger_client::{EthereumLedgerClient, LedgerClient};
pub use redis_ledger::RedisLedger;
pub use transfer_log::decode_transfer;
pub use used_payments::{JsonFileLedger, MemoryLedger, PaymentLedger};
pub use verifier::{PaymentVerifier, RecipientPolicy, VerifierConfig};
