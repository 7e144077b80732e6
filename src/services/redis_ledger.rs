use crate::{
    error::GateError,
    models::{RecordOutcome, TransactionId, UsedPaymentRecord},
    services::PaymentLedger,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;

const USED_PAYMENTS_KEY: &str = "payment_gate:used_payments";

/// Redis-backed ledger: one hash, field per transaction. `HSETNX` makes the
/// server decide which of two racing writers wins.
pub struct RedisLedger {
    conn: redis::aio::ConnectionManager,
}

impl RedisLedger {
    pub async fn connect(redis_url: &str) -> Result<Self, GateError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("Redis payment ledger connected");

        Ok(Self { conn })
    }
}

#[async_trait]
impl PaymentLedger for RedisLedger {
    async fn contains(&self, tx: &TransactionId) -> Result<bool, GateError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.hexists(USED_PAYMENTS_KEY, tx.to_string()).await?;
        Ok(exists)
    }

    async fn record(&self, tx: &TransactionId, claimant: &str) -> Result<RecordOutcome, GateError> {
        let record = UsedPaymentRecord {
            tx_hash: *tx,
            claimant: claimant.to_string(),
            verified_at: Utc::now(),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| GateError::LedgerUnavailable(e.to_string()))?;

        let mut conn = self.conn.clone();
        let inserted: bool = conn.hset_nx(USED_PAYMENTS_KEY, tx.to_string(), payload).await?;

        if inserted {
            tracing::info!("Recorded payment {} for {}", tx, claimant);
            Ok(RecordOutcome::Recorded)
        } else {
            tracing::debug!("Payment {} already recorded in redis", tx);
            Ok(RecordOutcome::AlreadyRecorded)
        }
    }

    async fn probe(&self) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_url_is_ledger_unavailable() {
        let err = RedisLedger::connect("not-a-redis-url").await.err().expect("should fail");
        assert!(matches!(err, GateError::LedgerUnavailable(_)));
    }
}
