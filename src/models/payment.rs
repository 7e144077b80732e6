use crate::error::GateError;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Canonical 32-byte transaction hash, rendered as `0x` + lower-case hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(H256);

impl TransactionId {
    /// Accepts upper or lower case, with or without the `0x` prefix.
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let trimmed = raw.trim().to_lowercase();
        let digits = trimmed.strip_prefix("0x").unwrap_or(&trimmed);

        if digits.len() != 64 {
            return Err(GateError::InvalidTransactionId(format!(
                "expected 64 hex digits, got {} in {:?}",
                digits.len(),
                raw
            )));
        }

        let bytes = hex::decode(digits)
            .map_err(|e| GateError::InvalidTransactionId(format!("{:?}: {}", raw, e)))?;

        Ok(Self(H256::from_slice(&bytes)))
    }

    pub fn as_h256(&self) -> H256 {
        self.0
    }
}

impl From<H256> for TransactionId {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

impl FromStr for TransactionId {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

/// A decoded `Transfer(address,address,uint256)` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
}

fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One consumed payment. Records are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedPaymentRecord {
    pub tx_hash: TransactionId,
    pub claimant: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Another writer got there first; nothing was written.
    AlreadyRecorded,
}

/// Largest decimals value whose scale factor fits in a `U256`.
pub const MAX_TOKEN_DECIMALS: u32 = 77;

/// Scale a smallest-unit amount by the token's decimals for display.
///
/// Integer arithmetic only. Keeps at least two fractional digits and drops
/// trailing zeros beyond that, so 1_000_000 at 6 decimals is `"1.00"`.
pub fn format_token_amount(amount: U256, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }

    // Past 10^77 the divisor no longer fits; every amount is then a pure fraction.
    let (whole, remainder) = match U256::from(10u64).checked_pow(U256::from(decimals)) {
        Some(divisor) => (amount / divisor, amount % divisor),
        None => (U256::zero(), amount),
    };
    let fraction = format!(
        "{:0>width$}",
        remainder.to_string(),
        width = decimals as usize
    );

    let keep = fraction.trim_end_matches('0').len().max(2usize.min(fraction.len()));
    format!("{}.{}", whole, &fraction[..keep])
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

    #[test]
    fn test_transaction_id_canonicalization() {
        let upper = TransactionId::parse(&HASH[2..].to_uppercase()).expect("valid hash");
        let lower = TransactionId::parse(HASH).expect("valid hash");
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), HASH);

        let padded = TransactionId::parse(&format!("  {}\n", HASH)).expect("valid hash");
        assert_eq!(padded, lower);
    }

    #[test]
    fn test_transaction_id_rejects_bad_input() {
        assert!(TransactionId::parse("0x1234").is_err());
        assert!(TransactionId::parse("").is_err());
        let not_hex = format!("0x{}", "zz".repeat(32));
        assert!(matches!(
            TransactionId::parse(&not_hex),
            Err(GateError::InvalidTransactionId(_))
        ));
    }

    #[test]
    fn test_transaction_id_serde() {
        let id = TransactionId::parse(HASH).expect("valid hash");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", HASH));

        let back: TransactionId =
            serde_json::from_str(&json.to_uppercase().replace("0X", "0x")).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_format_token_amount() {
        assert_eq!(format_token_amount(U256::from(1_000_000u64), 6), "1.00");
        assert_eq!(format_token_amount(U256::from(500_000u64), 6), "0.50");
        assert_eq!(format_token_amount(U256::from(1_234_567u64), 6), "1.234567");
        assert_eq!(format_token_amount(U256::from(999_999u64), 6), "0.999999");
        assert_eq!(format_token_amount(U256::from(7u64), 1), "0.7");
        assert_eq!(format_token_amount(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_format_token_amount_extreme_decimals() {
        assert_eq!(
            format_token_amount(U256::from(5u64), MAX_TOKEN_DECIMALS),
            format!("0.{}5", "0".repeat(76))
        );
        assert_eq!(
            format_token_amount(U256::from(1u64), 80),
            format!("0.{}1", "0".repeat(79))
        );
        assert!(format_token_amount(U256::MAX, 80).starts_with("0.0"));
    }

    #[test]
    fn test_transfer_event_amount_serializes_as_decimal() {
        let event = TransferEvent {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            amount: U256::from(1_000_000u64),
        };
        let value = serde_json::to_value(event).expect("serialize");
        assert_eq!(value["amount"], "1000000");
        assert_eq!(value["to"], "0x2222222222222222222222222222222222222222");
    }
}
