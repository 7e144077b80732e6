use crate::models::TransferEvent;
use crate::services::ledger_client::ReceiptLog;
use ethers::types::{Address, H256, U256};

/// `keccak256("Transfer(address,address,uint256)")`
pub const TRANSFER_EVENT_TOPIC: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

/// Decode an ERC-20 `Transfer` event, or `None` if the log is something else.
///
/// Addresses are the low 20 bytes of topics 1 and 2; the 12 bytes of padding
/// above them are ignored. The amount is the data payload read as a
/// big-endian integer. Payloads that are empty or wider than 256 significant
/// bits are not treated as transfers.
pub fn decode_transfer(log: &ReceiptLog) -> Option<TransferEvent> {
    if log.topics.first() != Some(&TRANSFER_EVENT_TOPIC) || log.topics.len() < 3 {
        return None;
    }

    let amount = decode_amount(log.data.as_ref())?;

    Some(TransferEvent {
        from: Address::from(log.topics[1]),
        to: Address::from(log.topics[2]),
        amount,
    })
}

fn decode_amount(data: &[u8]) -> Option<U256> {
    if data.is_empty() {
        return None;
    }

    let leading_zeros = data.iter().take_while(|b| **b == 0).count();
    let significant = &data[leading_zeros..];
    if significant.len() > 32 {
        return None;
    }

    Some(U256::from_big_endian(significant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;
    use ethers::utils::keccak256;

    fn topic_for(address: Address) -> H256 {
        H256::from(address)
    }

    fn amount_data(amount: u64) -> Bytes {
        let mut word = [0u8; 32];
        U256::from(amount).to_big_endian(&mut word);
        Bytes::from(word.to_vec())
    }

    fn transfer_log(from: Address, to: Address, amount: u64) -> ReceiptLog {
        ReceiptLog {
            address: Address::repeat_byte(0xaa),
            topics: vec![TRANSFER_EVENT_TOPIC, topic_for(from), topic_for(to)],
            data: amount_data(amount),
        }
    }

    #[test]
    fn test_topic_matches_event_signature() {
        let expected = H256::from(keccak256("Transfer(address,address,uint256)"));
        assert_eq!(TRANSFER_EVENT_TOPIC, expected);
    }

    #[test]
    fn test_decodes_transfer() {
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);

        let event = decode_transfer(&transfer_log(from, to, 1_000_000)).expect("transfer");
        assert_eq!(event.from, from);
        assert_eq!(event.to, to);
        assert_eq!(event.amount, U256::from(1_000_000u64));
    }

    #[test]
    fn test_ignores_dirty_topic_padding() {
        let to = Address::repeat_byte(0x22);
        let mut log = transfer_log(Address::repeat_byte(0x11), to, 5);
        log.topics[2].0[..12].copy_from_slice(&[0xff; 12]);

        let event = decode_transfer(&log).expect("transfer");
        assert_eq!(event.to, to);
    }

    #[test]
    fn test_other_events_are_not_applicable() {
        let mut log = transfer_log(Address::repeat_byte(1), Address::repeat_byte(2), 5);
        // Approval(address,address,uint256)
        log.topics[0] = H256::from(keccak256("Approval(address,address,uint256)"));
        assert!(decode_transfer(&log).is_none());

        log.topics.clear();
        assert!(decode_transfer(&log).is_none());
    }

    #[test]
    fn test_short_topics_or_empty_data_are_not_applicable() {
        let mut log = transfer_log(Address::repeat_byte(1), Address::repeat_byte(2), 5);
        log.topics.truncate(2);
        assert!(decode_transfer(&log).is_none());

        let mut log = transfer_log(Address::repeat_byte(1), Address::repeat_byte(2), 5);
        log.data = Bytes::default();
        assert!(decode_transfer(&log).is_none());
    }

    #[test]
    fn test_amount_tolerates_wide_zero_padded_payload() {
        let mut data = vec![0u8; 40];
        data[39] = 0x2a;
        assert_eq!(decode_amount(&data), Some(U256::from(42u64)));

        let mut overflow = vec![0u8; 33];
        overflow[0] = 1;
        assert_eq!(decode_amount(&overflow), None);

        assert_eq!(decode_amount(&[0u8; 32]), Some(U256::zero()));
    }
}
