//! The set of transactions already consumed by a registration.
//!
//! Whatever the backend, `record` is the final arbiter of "used": a second
//! record for the same transaction reports [`RecordOutcome::AlreadyRecorded`]
//! and writes nothing.

use crate::{
    error::GateError,
    models::{RecordOutcome, TransactionId, UsedPaymentRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn contains(&self, tx: &TransactionId) -> Result<bool, GateError>;

    async fn record(&self, tx: &TransactionId, claimant: &str)
        -> Result<RecordOutcome, GateError>;

    /// Cheap reachability check for health reporting.
    async fn probe(&self) -> Result<(), GateError>;
}

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<TransactionId, UsedPaymentRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, tx: &TransactionId) -> Option<UsedPaymentRecord> {
        self.records.read().await.get(tx).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl PaymentLedger for MemoryLedger {
    async fn contains(&self, tx: &TransactionId) -> Result<bool, GateError> {
        Ok(self.records.read().await.contains_key(tx))
    }

    async fn record(&self, tx: &TransactionId, claimant: &str) -> Result<RecordOutcome, GateError> {
        let mut records = self.records.write().await;
        if records.contains_key(tx) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        records.insert(
            *tx,
            UsedPaymentRecord {
                tx_hash: *tx,
                claimant: claimant.to_string(),
                verified_at: Utc::now(),
            },
        );
        Ok(RecordOutcome::Recorded)
    }

    async fn probe(&self) -> Result<(), GateError> {
        Ok(())
    }
}

/// On-disk layout shared with the registry tooling:
/// `{"transactions": [...], "details": {"0x..": {"agent", "verified_at"}}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct UsedPaymentsFile {
    #[serde(default)]
    transactions: Vec<String>,
    #[serde(default)]
    details: BTreeMap<String, UsedPaymentDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsedPaymentDetail {
    agent: String,
    verified_at: DateTime<Utc>,
}

/// JSON file ledger. Every `contains` reads the file; nothing is cached.
///
/// A `record` holds an exclusive lock on a sibling `.lock` file for the whole
/// read-modify-write, so several processes can share one ledger file. Each
/// write goes through a unique temp file that is renamed into place, so
/// readers never see a torn file.
pub struct JsonFileLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record currently on disk, in key order.
    pub async fn load_records(&self) -> Result<Vec<UsedPaymentRecord>, GateError> {
        let file = self.load().await?;
        file.details
            .into_iter()
            .map(|(key, detail)| {
                Ok(UsedPaymentRecord {
                    tx_hash: TransactionId::parse(&key).map_err(|e| {
                        GateError::LedgerUnavailable(format!("corrupt key {}: {}", key, e))
                    })?,
                    claimant: detail.agent,
                    verified_at: detail.verified_at,
                })
            })
            .collect()
    }

    async fn load(&self) -> Result<UsedPaymentsFile, GateError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => UsedPaymentsFile::parse(&self.path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsedPaymentsFile::default()),
            Err(e) => Err(ledger_io("read", &self.path, e)),
        }
    }
}

impl UsedPaymentsFile {
    fn contains(&self, key: &str) -> bool {
        self.details.contains_key(key)
            || self.transactions.iter().any(|t| t.eq_ignore_ascii_case(key))
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, GateError> {
        serde_json::from_str(raw).map_err(|e| {
            GateError::LedgerUnavailable(format!("corrupt {}: {}", path.display(), e))
        })
    }

    fn read_blocking(path: &Path) -> Result<Self, GateError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ledger_io("read", path, e)),
        }
    }

    fn write_blocking(&self, path: &Path, dir: &Path) -> Result<(), GateError> {
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ledger_io("write", path, e))?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), self)
            .map_err(|e| GateError::LedgerUnavailable(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| ledger_io("write", path, e))?;
        tmp.persist(path)
            .map_err(|e| ledger_io("write", path, e.error))?;
        Ok(())
    }
}

fn ledger_io(action: &str, path: &Path, err: std::io::Error) -> GateError {
    GateError::LedgerUnavailable(format!("{} {}: {}", action, path.display(), err))
}

/// Read-modify-write of the ledger file under an exclusive file lock. The
/// lock is released when the lock file handle is dropped.
fn record_blocking(
    path: &Path,
    key: String,
    claimant: String,
) -> Result<RecordOutcome, GateError> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| ledger_io("create", &dir, e))?;

    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| ledger_io("open", &lock_path, e))?;
    lock.lock_exclusive()
        .map_err(|e| ledger_io("lock", &lock_path, e))?;

    // Re-read under the lock; the file is the source of truth.
    let mut file = UsedPaymentsFile::read_blocking(path)?;
    if file.contains(&key) {
        tracing::debug!("Payment {} already recorded in {}", key, path.display());
        return Ok(RecordOutcome::AlreadyRecorded);
    }

    file.transactions.push(key.clone());
    file.details.insert(
        key,
        UsedPaymentDetail {
            agent: claimant,
            verified_at: Utc::now(),
        },
    );
    file.write_blocking(path, &dir)?;
    Ok(RecordOutcome::Recorded)
}

#[async_trait]
impl PaymentLedger for JsonFileLedger {
    async fn contains(&self, tx: &TransactionId) -> Result<bool, GateError> {
        Ok(self.load().await?.contains(&tx.to_string()))
    }

    async fn record(&self, tx: &TransactionId, claimant: &str) -> Result<RecordOutcome, GateError> {
        // In-process writers queue here; the file lock covers other processes.
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        let key = tx.to_string();
        let agent = claimant.to_string();
        let outcome = tokio::task::spawn_blocking(move || record_blocking(&path, key, agent))
            .await
            .map_err(|e| GateError::LedgerUnavailable(format!("ledger writer: {}", e)))??;

        if outcome == RecordOutcome::Recorded {
            tracing::info!("Recorded payment {} for {}", tx, claimant);
        }
        Ok(outcome)
    }

    async fn probe(&self) -> Result<(), GateError> {
        self.load().await.map(|_| ())
    }
}
