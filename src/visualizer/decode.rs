//! Event signature recognition
//!
//! A small fixed set of signatures is decoded into typed events; everything
//! else stays in the record as `Unknown`. ERC-20 and ERC-721 share the
//! `Transfer`/`Approval` topic hash - the indexed-topic count tells them
//! apart (721 indexes the token id, so it carries one extra topic and no
//! data).

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolEvent};

use super::TokenEvent;
use crate::chain::LogEntry;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
    event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
}

fn word(topic: B256) -> Address {
    Address::from_word(topic)
}

/// Decodes one raw log into a typed token event, or `Unknown` if the
/// signature or shape does not match anything we recognize.
pub fn decode_log(log: &LogEntry) -> TokenEvent {
    let Some(&topic0) = log.topics.first() else {
        return TokenEvent::Unknown { log: log.clone() };
    };

    if topic0 == Transfer::SIGNATURE_HASH {
        match log.topics.len() {
            3 if log.data.len() >= 32 => {
                return TokenEvent::Erc20Transfer {
                    token: log.address,
                    from: word(log.topics[1]),
                    to: word(log.topics[2]),
                    amount: U256::from_be_slice(&log.data[..32]),
                }
            }
            4 => {
                return TokenEvent::Erc721Transfer {
                    collection: log.address,
                    from: word(log.topics[1]),
                    to: word(log.topics[2]),
                    token_id: U256::from_be_bytes(log.topics[3].0),
                }
            }
            _ => return TokenEvent::Unknown { log: log.clone() },
        }
    }

    if topic0 == Approval::SIGNATURE_HASH {
        match log.topics.len() {
            3 if log.data.len() >= 32 => {
                return TokenEvent::Erc20Approval {
                    token: log.address,
                    owner: word(log.topics[1]),
                    spender: word(log.topics[2]),
                    amount: U256::from_be_slice(&log.data[..32]),
                }
            }
            4 => {
                return TokenEvent::Erc721Approval {
                    collection: log.address,
                    owner: word(log.topics[1]),
                    approved: word(log.topics[2]),
                    token_id: U256::from_be_bytes(log.topics[3].0),
                }
            }
            _ => return TokenEvent::Unknown { log: log.clone() },
        }
    }

    if topic0 == ApprovalForAll::SIGNATURE_HASH && log.topics.len() == 3 && log.data.len() >= 32 {
        return TokenEvent::ApprovalForAll {
            collection: log.address,
            owner: word(log.topics[1]),
            operator: word(log.topics[2]),
            approved: log.data[31] != 0,
        };
    }

    TokenEvent::Unknown { log: log.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn amount_data(amount: u64) -> Bytes {
        Bytes::from(U256::from(amount).to_be_bytes::<32>())
    }

    #[test]
    fn test_erc20_transfer() {
        let log = LogEntry {
            address: addr(0x70),
            topics: vec![
                Transfer::SIGNATURE_HASH,
                addr(1).into_word(),
                addr(2).into_word(),
            ],
            data: amount_data(100),
        };
        assert_eq!(
            decode_log(&log),
            TokenEvent::Erc20Transfer {
                token: addr(0x70),
                from: addr(1),
                to: addr(2),
                amount: U256::from(100),
            }
        );
    }

    #[test]
    fn test_erc721_transfer_by_topic_count() {
        let log = LogEntry {
            address: addr(0x71),
            topics: vec![
                Transfer::SIGNATURE_HASH,
                addr(1).into_word(),
                addr(2).into_word(),
                B256::from(U256::from(7)),
            ],
            data: Bytes::new(),
        };
        assert_eq!(
            decode_log(&log),
            TokenEvent::Erc721Transfer {
                collection: addr(0x71),
                from: addr(1),
                to: addr(2),
                token_id: U256::from(7),
            }
        );
    }

    #[test]
    fn test_erc20_approval() {
        let log = LogEntry {
            address: addr(0x70),
            topics: vec![
                Approval::SIGNATURE_HASH,
                addr(1).into_word(),
                addr(3).into_word(),
            ],
            data: Bytes::from(U256::MAX.to_be_bytes::<32>()),
        };
        let event = decode_log(&log);
        assert!(event.is_approval());
        assert_eq!(event.approval_target(), Some(addr(3)));
    }

    #[test]
    fn test_approval_for_all_toggle() {
        let on = LogEntry {
            address: addr(0x71),
            topics: vec![
                ApprovalForAll::SIGNATURE_HASH,
                addr(1).into_word(),
                addr(4).into_word(),
            ],
            data: amount_data(1),
        };
        let off = LogEntry { data: amount_data(0), ..on.clone() };
        assert!(decode_log(&on).is_approval());
        assert!(!decode_log(&off).is_approval());
    }

    #[test]
    fn test_unrecognized_log_is_kept_not_dropped() {
        let log = LogEntry {
            address: addr(0x99),
            topics: vec![B256::repeat_byte(0xab)],
            data: Bytes::from(vec![1, 2, 3]),
        };
        match decode_log(&log) {
            TokenEvent::Unknown { log: kept } => assert_eq!(kept, log),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_transfer_is_unknown() {
        // right signature, but only two topics and no data
        let log = LogEntry {
            address: addr(0x70),
            topics: vec![Transfer::SIGNATURE_HASH, addr(1).into_word()],
            data: Bytes::new(),
        };
        assert!(!decode_log(&log).is_decoded());
    }
}
