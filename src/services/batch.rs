//! Verify every pending registration found in the registry.
//!
//! Retries belong here, not in the verifier: infrastructure failures are
//! retried with exponential backoff, policy rejections are final for the run.

use crate::{
    error::GateError,
    models::{RejectionCode, VerificationResult},
    services::PaymentVerifier,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One registration awaiting payment verification, as stored in the
/// registry's pending directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub agent: String,
    #[serde(alias = "payment_tx")]
    pub tx_hash: String,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadableEntry {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct PendingScan {
    pub registrations: Vec<PendingRegistration>,
    pub unreadable: Vec<UnreadableEntry>,
}

/// Read every `*.json` file in `dir`, in file-name order. A file that cannot
/// be read or parsed is reported and skipped.
pub async fn load_pending(dir: &Path) -> Result<PendingScan, GateError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        GateError::ConfigError(format!("pending directory {}: {}", dir.display(), e))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GateError::ConfigError(format!("pending directory {}: {}", dir.display(), e)))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut scan = PendingScan::default();
    for path in paths {
        let parsed = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<PendingRegistration>(&raw).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(mut registration) => {
                registration.source = Some(path);
                scan.registrations.push(registration);
            }
            Err(error) => {
                tracing::warn!("Skipping unreadable registration {}: {}", path.display(), error);
                scan.unreadable.push(UnreadableEntry { path, error });
            }
        }
    }

    tracing::info!(
        "Found {} pending registrations in {} ({} unreadable)",
        scan.registrations.len(),
        dir.display(),
        scan.unreadable.len()
    );
    Ok(scan)
}

/// Upper bound on the wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Consume verified payments for their agents.
    pub record: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            record: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Verified { result: VerificationResult },
    Failed { error: String, error_code: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub registration: PendingRegistration,
    pub attempts: u32,
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub unreadable: Vec<UnreadableEntry>,
}

impl BatchReport {
    pub fn accepted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(&e.outcome, BatchOutcome::Verified { result } if result.valid))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(&e.outcome, BatchOutcome::Verified { result } if !result.valid))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchOutcome::Failed { .. }))
            .count()
    }

    /// Rejections that may pass on a later run (pending or shallow payments).
    pub fn retry_later(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| match &e.outcome {
                BatchOutcome::Verified { result } => result
                    .rejection_code()
                    .map(RejectionCode::is_retryable)
                    .unwrap_or(false),
                BatchOutcome::Failed { .. } => false,
            })
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || !self.unreadable.is_empty()
    }
}

pub struct BatchVerifier {
    verifier: Arc<PaymentVerifier>,
    config: BatchConfig,
}

impl BatchVerifier {
    pub fn new(verifier: Arc<PaymentVerifier>, config: BatchConfig) -> Self {
        Self { verifier, config }
    }

    pub async fn run_dir(&self, dir: &Path) -> Result<BatchReport, GateError> {
        let scan = load_pending(dir).await?;
        let mut report = self.run(scan.registrations).await;
        report.unreadable = scan.unreadable;
        Ok(report)
    }

    /// Results come back in input order.
    pub async fn run(&self, registrations: Vec<PendingRegistration>) -> BatchReport {
        let entries = futures::stream::iter(
            registrations
                .into_iter()
                .map(|registration| self.verify_with_retry(registration)),
        )
        .buffered(self.config.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        let report = BatchReport {
            entries,
            unreadable: Vec::new(),
        };

        tracing::info!(
            "Batch verification complete: {} accepted, {} rejected, {} failed",
            report.accepted(),
            report.rejected(),
            report.failed()
        );
        report
    }

    async fn verify_with_retry(&self, registration: PendingRegistration) -> BatchEntry {
        let mut attempts = 1;
        let mut backoff = self.config.initial_backoff;

        loop {
            let verified = self
                .verifier
                .verify(
                    &registration.tx_hash,
                    Some(&registration.agent),
                    self.config.record,
                )
                .await;

            match verified {
                Ok(result) => {
                    return BatchEntry {
                        registration,
                        attempts,
                        outcome: BatchOutcome::Verified { result },
                    }
                }
                Err(e) if e.is_retryable() && attempts < self.config.max_attempts => {
                    tracing::warn!(
                        "Verification of {} for {} failed (attempt {}/{}): {}; retrying in {:?}",
                        registration.tx_hash,
                        registration.agent,
                        attempts,
                        self.config.max_attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    attempts += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Verification of {} for {} gave up: {}",
                        registration.tx_hash,
                        registration.agent,
                        e
                    );
                    return BatchEntry {
                        registration,
                        attempts,
                        outcome: BatchOutcome::Failed {
                            error: e.to_string(),
                            error_code: e.error_code().to_string(),
                        },
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_chain::*;
    use crate::services::{MemoryLedger, RecipientPolicy, VerifierConfig};

    fn verifier(chain: Arc<MockChain>, ledger: Arc<MemoryLedger>) -> Arc<PaymentVerifier> {
        let config = VerifierConfig {
            token_contract: TOKEN,
            recipient: RecipientPolicy::Treasury(TREASURY),
            ..VerifierConfig::default()
        };
        Arc::new(PaymentVerifier::new(chain, ledger, config))
    }

    fn fast_config(record: bool) -> BatchConfig {
        BatchConfig {
            concurrency: 2,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            record,
        }
    }

    fn pending(agent: &str, byte: u8) -> PendingRegistration {
        PendingRegistration {
            agent: agent.to_string(),
            tx_hash: tx_id(byte).to_string(),
            source: None,
        }
    }

    fn paid(chain: &MockChain, byte: u8, amount: u64) {
        chain.insert(
            tx_id(byte),
            token_transaction(Some(100)),
            Some(receipt(true, vec![transfer_log(TOKEN, PAYER, TREASURY, amount)])),
        );
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_backoff(Duration::from_secs(40)), MAX_BACKOFF);
        assert_eq!(next_backoff(Duration::MAX), MAX_BACKOFF);

        let mut backoff = Duration::from_millis(500);
        for _ in 0..200 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_load_pending_sorted_and_tolerant() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("b-agent.json"),
            serde_json::json!({ "agent": "b", "payment_tx": tx_id(2).to_string() }).to_string(),
        )
        .expect("write");
        std::fs::write(
            dir.path().join("a-agent.json"),
            serde_json::json!({ "agent": "a", "tx_hash": tx_id(1).to_string() }).to_string(),
        )
        .expect("write");
        std::fs::write(dir.path().join("broken.json"), "{").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let scan = load_pending(dir.path()).await.expect("scan");
        let agents: Vec<_> = scan.registrations.iter().map(|r| r.agent.as_str()).collect();
        assert_eq!(agents, vec!["a", "b"]);
        assert_eq!(scan.unreadable.len(), 1);
        assert!(scan.registrations[0].source.is_some());
    }

    #[tokio::test]
    async fn test_missing_pending_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_pending(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, GateError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_batch_records_and_reports() {
        let chain = Arc::new(MockChain::at_height(120));
        paid(&chain, 1, 1_000_000);
        paid(&chain, 2, 10);
        let ledger = Arc::new(MemoryLedger::new());
        let batch = BatchVerifier::new(verifier(chain, ledger.clone()), fast_config(true));

        let report = batch
            .run(vec![pending("a", 1), pending("b", 2), pending("c", 3)])
            .await;

        assert_eq!(report.accepted(), 1);
        assert_eq!(report.rejected(), 2);
        assert_eq!(report.failed(), 0);
        assert!(!report.has_failures());
        assert_eq!(report.entries[0].registration.agent, "a");
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_transient_node_failure_is_retried() {
        let chain = Arc::new(MockChain::at_height(120));
        paid(&chain, 1, 1_000_000);
        chain.fail_next(1);
        let batch = BatchVerifier::new(
            verifier(chain, Arc::new(MemoryLedger::new())),
            fast_config(false),
        );

        let report = batch.run(vec![pending("a", 1)]).await;
        assert_eq!(report.accepted(), 1);
        assert_eq!(report.entries[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_gives_up() {
        let chain = Arc::new(MockChain::at_height(120));
        paid(&chain, 1, 1_000_000);
        chain.set_offline(true);
        let batch = BatchVerifier::new(
            verifier(chain, Arc::new(MemoryLedger::new())),
            fast_config(false),
        );

        let report = batch.run(vec![pending("a", 1)]).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.entries[0].attempts, 3);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let chain = Arc::new(MockChain::at_height(105));
        paid(&chain, 1, 1_000_000);
        let batch = BatchVerifier::new(
            verifier(chain, Arc::new(MemoryLedger::new())),
            fast_config(false),
        );

        let report = batch.run(vec![pending("a", 1)]).await;
        assert_eq!(report.rejected(), 1);
        assert_eq!(report.retry_later(), 1);
        assert_eq!(report.entries[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_hash_is_not_retried() {
        let chain = Arc::new(MockChain::at_height(120));
        let batch = BatchVerifier::new(
            verifier(chain, Arc::new(MemoryLedger::new())),
            fast_config(false),
        );

        let registration = PendingRegistration {
            agent: "a".into(),
            tx_hash: "0x1234".into(),
            source: None,
        };
        let report = batch.run(vec![registration]).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.entries[0].attempts, 1);
    }
}
