//! Scripted [`LedgerClient`] for unit tests.

use crate::{
    error::GateError,
    models::TransactionId,
    services::{
        ledger_client::{ChainReceipt, ChainTransaction, LedgerClient, ReceiptLog},
        transfer_log::TRANSFER_EVENT_TOPIC,
    },
};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H160, H256, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

pub const TOKEN: Address = H160([0x83; 20]);
pub const TREASURY: Address = H160([0x3e; 20]);
pub const PAYER: Address = H160([0x11; 20]);

pub fn tx_id(byte: u8) -> TransactionId {
    TransactionId::from(H256::repeat_byte(byte))
}

pub fn transfer_log(emitter: Address, from: Address, to: Address, amount: u64) -> ReceiptLog {
    let mut word = [0u8; 32];
    U256::from(amount).to_big_endian(&mut word);
    ReceiptLog {
        address: emitter,
        topics: vec![TRANSFER_EVENT_TOPIC, H256::from(from), H256::from(to)],
        data: Bytes::from(word.to_vec()),
    }
}

pub fn token_transaction(block: Option<u64>) -> ChainTransaction {
    ChainTransaction {
        from: PAYER,
        to: Some(TOKEN),
        block_number: block,
    }
}

pub fn receipt(succeeded: bool, logs: Vec<ReceiptLog>) -> ChainReceipt {
    ChainReceipt { succeeded, logs }
}

#[derive(Default)]
pub struct MockChain {
    transactions: RwLock<HashMap<TransactionId, ChainTransaction>>,
    receipts: RwLock<HashMap<TransactionId, ChainReceipt>>,
    height: AtomicU64,
    offline: AtomicBool,
    /// Number of calls that fail before the node comes back.
    failures_left: AtomicUsize,
}

impl MockChain {
    pub fn at_height(height: u64) -> Self {
        let chain = Self::default();
        chain.set_height(height);
        chain
    }

    pub fn with_payment(
        self,
        tx: TransactionId,
        transaction: ChainTransaction,
        receipt: Option<ChainReceipt>,
    ) -> Self {
        self.insert(tx, transaction, receipt);
        self
    }

    pub fn insert(
        &self,
        tx: TransactionId,
        transaction: ChainTransaction,
        receipt: Option<ChainReceipt>,
    ) {
        if let Ok(mut txs) = self.transactions.write() {
            txs.insert(tx, transaction);
        }
        if let (Some(receipt), Ok(mut receipts)) = (receipt, self.receipts.write()) {
            receipts.insert(tx, receipt);
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: usize) {
        self.failures_left.store(calls, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), GateError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GateError::NodeUnavailable("node offline".into()));
        }
        let flaky = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(GateError::NodeUnavailable("transient failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockChain {
    async fn get_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<ChainTransaction>, GateError> {
        self.check_online()?;
        Ok(self.transactions.read().ok().and_then(|txs| txs.get(tx).cloned()))
    }

    async fn get_receipt(&self, tx: &TransactionId) -> Result<Option<ChainReceipt>, GateError> {
        self.check_online()?;
        Ok(self.receipts.read().ok().and_then(|r| r.get(tx).cloned()))
    }

    async fn current_height(&self) -> Result<u64, GateError> {
        self.check_online()?;
        Ok(self.height.load(Ordering::SeqCst))
    }
}
