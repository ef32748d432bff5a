//! Deterministic in-memory chain-state provider
//!
//! Backs offline mode and the test suite: a native-balance ledger, a set of
//! contract addresses, and minimal fungible-token semantics (`transfer`,
//! `approve`, `setApprovalForAll` calldata is recognized and the matching
//! logs synthesized). Reverts roll back every write of the reverting entry
//! while later entries keep executing - the same sequencing a real node
//! applies when mining.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use eyre::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::{
    donor_reserve, BlockHandle, CallOutcome, CallStatus, ChainStateProvider, LogEntry,
    ValueTransfer, DONOR_ADDRESS,
};
use crate::simulation::state::TransactionEnvelope;

sol! {
    interface IToken {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
        event ApprovalForAll(address indexed owner, address indexed operator, bool approved);

        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }
}

const GAS_PLAIN_TRANSFER: u64 = 21_000;
const GAS_TOKEN_OP: u64 = 48_000;
const GAS_FALLBACK: u64 = 30_000;
const GAS_DEPLOYMENT: u64 = 53_000;

#[derive(Debug, Clone, Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    contracts: HashSet<Address>,
    token_balances: HashMap<Address, HashMap<Address, U256>>,
}

/// In-memory provider with an explicitly seeded world state
pub struct LocalChainProvider {
    chain_id: u64,
    block: Mutex<BlockHandle>,
    ledger: Mutex<Ledger>,
    /// Artificial latency before answering `execute_chain`; used to exercise
    /// the caller's timeout policy.
    response_delay: Option<Duration>,
}

impl LocalChainProvider {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            block: Mutex::new(BlockHandle { number: 1, timestamp: 1_700_000_000 }),
            ledger: Mutex::new(Ledger::default()),
            response_delay: None,
        }
    }

    pub fn with_balance(self, address: Address, balance: U256) -> Self {
        self.ledger.lock().unwrap().balances.insert(address, balance);
        self
    }

    /// Registers a plain contract (code present, no recognized methods)
    pub fn with_contract(self, address: Address) -> Self {
        self.ledger.lock().unwrap().contracts.insert(address);
        self
    }

    /// Registers a fungible token contract with initial holder balances
    pub fn with_token(self, token: Address, holders: &[(Address, U256)]) -> Self {
        {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.contracts.insert(token);
            ledger.token_balances.insert(token, holders.iter().copied().collect());
        }
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    /// Moves the head forward one block
    pub fn advance_block(&self) {
        let mut block = self.block.lock().unwrap();
        block.number += 1;
        block.timestamp += 12;
    }

    /// Moves the head backward one block, like a lagging node behind a
    /// load balancer
    pub fn rewind_block(&self) {
        let mut block = self.block.lock().unwrap();
        block.number = block.number.saturating_sub(1);
        block.timestamp = block.timestamp.saturating_sub(12);
    }

    fn simulate_one(working: &mut Ledger, tx: &TransactionEnvelope) -> CallOutcome {
        // Work on a scratch copy; commit only if the entry succeeds, so a
        // revert contributes no state change to later entries.
        let mut scratch = working.clone();
        let outcome = Self::apply(&mut scratch, tx);
        if outcome.status.is_success() {
            *working = scratch;
        }
        outcome
    }

    fn apply(ledger: &mut Ledger, tx: &TransactionEnvelope) -> CallOutcome {
        let mut value_transfers = Vec::new();

        // Top-level value movement first, like a node does
        if !tx.value.is_zero() {
            let recipient = tx.to.unwrap_or(Address::ZERO);
            let sender_balance = ledger.balances.get(&tx.from).copied().unwrap_or_default();
            if sender_balance < tx.value {
                return CallOutcome::reverted(
                    "insufficient funds for transfer",
                    GAS_PLAIN_TRANSFER,
                );
            }
            ledger.balances.insert(tx.from, sender_balance - tx.value);
            let recipient_balance = ledger.balances.get(&recipient).copied().unwrap_or_default();
            ledger.balances.insert(recipient, recipient_balance + tx.value);
            value_transfers.push(ValueTransfer { from: tx.from, to: recipient, amount: tx.value });
        }

        let to = match tx.to {
            Some(to) => to,
            None => {
                return CallOutcome {
                    status: CallStatus::Success,
                    return_data: Bytes::new(),
                    logs: Vec::new(),
                    value_transfers,
                    gas_used: GAS_DEPLOYMENT,
                }
            }
        };

        if ledger.token_balances.contains_key(&to) && !tx.input.is_empty() {
            return Self::apply_token_call(ledger, tx, to, value_transfers);
        }

        let gas_used = if tx.input.is_empty() && !ledger.contracts.contains(&to) {
            GAS_PLAIN_TRANSFER
        } else {
            GAS_FALLBACK
        };
        CallOutcome {
            status: CallStatus::Success,
            return_data: Bytes::new(),
            logs: Vec::new(),
            value_transfers,
            gas_used,
        }
    }

    fn apply_token_call(
        ledger: &mut Ledger,
        tx: &TransactionEnvelope,
        token: Address,
        value_transfers: Vec<ValueTransfer>,
    ) -> CallOutcome {
        let input = tx.input.as_ref();

        if let Ok(call) = IToken::transferCall::abi_decode(input) {
            let holders = ledger.token_balances.get_mut(&token).unwrap();
            let sender_balance = holders.get(&tx.from).copied().unwrap_or_default();
            if sender_balance < call.amount {
                return CallOutcome::reverted(
                    "ERC20: transfer amount exceeds balance",
                    GAS_TOKEN_OP,
                );
            }
            holders.insert(tx.from, sender_balance - call.amount);
            let to_balance = holders.get(&call.to).copied().unwrap_or_default();
            holders.insert(call.to, to_balance + call.amount);
            return CallOutcome {
                status: CallStatus::Success,
                return_data: true.abi_encode().into(),
                logs: vec![LogEntry {
                    address: token,
                    topics: vec![
                        IToken::Transfer::SIGNATURE_HASH,
                        tx.from.into_word(),
                        call.to.into_word(),
                    ],
                    data: Bytes::from(call.amount.to_be_bytes::<32>()),
                }],
                value_transfers,
                gas_used: GAS_TOKEN_OP,
            };
        }

        if let Ok(call) = IToken::approveCall::abi_decode(input) {
            return CallOutcome {
                status: CallStatus::Success,
                return_data: true.abi_encode().into(),
                logs: vec![LogEntry {
                    address: token,
                    topics: vec![
                        IToken::Approval::SIGNATURE_HASH,
                        tx.from.into_word(),
                        call.spender.into_word(),
                    ],
                    data: Bytes::from(call.amount.to_be_bytes::<32>()),
                }],
                value_transfers,
                gas_used: GAS_TOKEN_OP,
            };
        }

        if let Ok(call) = IToken::setApprovalForAllCall::abi_decode(input) {
            return CallOutcome {
                status: CallStatus::Success,
                return_data: Bytes::new(),
                logs: vec![LogEntry {
                    address: token,
                    topics: vec![
                        IToken::ApprovalForAll::SIGNATURE_HASH,
                        tx.from.into_word(),
                        call.operator.into_word(),
                    ],
                    data: Bytes::from(U256::from(call.approved as u8).to_be_bytes::<32>()),
                }],
                value_transfers,
                gas_used: GAS_TOKEN_OP,
            };
        }

        let selector = if input.len() >= 4 { hex::encode(&input[..4]) } else { String::new() };
        CallOutcome::reverted(format!("unrecognized method 0x{selector}"), GAS_FALLBACK)
    }
}

#[async_trait]
impl ChainStateProvider for LocalChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> Result<BlockHandle> {
        Ok(*self.block.lock().unwrap())
    }

    async fn execute_chain(
        &self,
        block: BlockHandle,
        transactions: &[TransactionEnvelope],
    ) -> Result<Vec<CallOutcome>> {
        if let Some(delay) = self.response_delay {
            tokio::time::sleep(delay).await;
        }
        debug!(
            block = block.number,
            count = transactions.len(),
            "executing transaction chain against local ledger"
        );
        let mut working = self.ledger.lock().unwrap().clone();
        working.balances.entry(DONOR_ADDRESS).or_insert_with(donor_reserve);
        Ok(transactions.iter().map(|tx| Self::simulate_one(&mut working, tx)).collect())
    }

    async fn balance_at(&self, address: Address, _block: u64) -> Result<U256> {
        if address == DONOR_ADDRESS {
            return Ok(donor_reserve());
        }
        Ok(self.ledger.lock().unwrap().balances.get(&address).copied().unwrap_or_default())
    }

    async fn has_code(&self, address: Address, _block: u64) -> Result<bool> {
        Ok(self.ledger.lock().unwrap().contracts.contains(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn eth(units: u64) -> U256 {
        U256::from(units) * U256::from(10u8).pow(U256::from(18))
    }

    fn transfer_calldata(to: Address, amount: U256) -> Bytes {
        IToken::transferCall { to, amount }.abi_encode().into()
    }

    #[tokio::test]
    async fn test_value_transfer_moves_balance() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let provider = LocalChainProvider::new(1).with_balance(a, eth(10));
        let tx = TransactionEnvelope::value_transfer(a, b, eth(3), 1);
        let block = provider.latest_block().await.unwrap();

        let outcomes = provider.execute_chain(block, &[tx]).await.unwrap();
        assert!(outcomes[0].status.is_success());
        assert_eq!(
            outcomes[0].value_transfers,
            vec![ValueTransfer { from: a, to: b, amount: eth(3) }]
        );
    }

    #[tokio::test]
    async fn test_revert_leaves_no_trace_for_later_entries() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let c = addr(0xcc);
        // a has 5 ETH; first entry tries to send 100 (reverts), second sends 5
        let provider = LocalChainProvider::new(1).with_balance(a, eth(5));
        let t1 = TransactionEnvelope::value_transfer(a, c, eth(100), 1);
        let t2 = TransactionEnvelope::value_transfer(a, b, eth(5), 1);
        let block = provider.latest_block().await.unwrap();

        let outcomes = provider.execute_chain(block, &[t1, t2]).await.unwrap();
        assert!(!outcomes[0].status.is_success());
        assert!(outcomes[0].value_transfers.is_empty());
        // t2 only succeeds because t1's attempted write was rolled back
        assert!(outcomes[1].status.is_success());
    }

    #[tokio::test]
    async fn test_token_transfer_emits_log_and_updates_ledger() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let token = addr(0x70);
        let provider = LocalChainProvider::new(1).with_token(token, &[(a, U256::from(100))]);
        let block = provider.latest_block().await.unwrap();

        let t1 = TransactionEnvelope::contract_call(a, token, transfer_calldata(b, U256::from(100)), 1);
        // second send must fail: a's token balance is spent by t1
        let t2 = TransactionEnvelope::contract_call(a, token, transfer_calldata(b, U256::from(1)), 1);
        let outcomes = provider.execute_chain(block, &[t1, t2]).await.unwrap();

        assert!(outcomes[0].status.is_success());
        assert_eq!(outcomes[0].logs.len(), 1);
        assert_eq!(outcomes[0].logs[0].address, token);
        assert_eq!(outcomes[0].logs[0].topics[0], IToken::Transfer::SIGNATURE_HASH);
        assert_eq!(
            outcomes[1].status.revert_reason(),
            Some("ERC20: transfer amount exceeds balance")
        );
    }

    #[tokio::test]
    async fn test_chains_do_not_leak_between_calls() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let provider = LocalChainProvider::new(1).with_balance(a, eth(5));
        let tx = TransactionEnvelope::value_transfer(a, b, eth(5), 1);
        let block = provider.latest_block().await.unwrap();

        // Same chain executed twice: the seeded ledger is the snapshot, so
        // the second run must not observe the first run's spend.
        let first = provider.execute_chain(block, std::slice::from_ref(&tx)).await.unwrap();
        let second = provider.execute_chain(block, std::slice::from_ref(&tx)).await.unwrap();
        assert!(first[0].status.is_success());
        assert!(second[0].status.is_success());
    }

    #[tokio::test]
    async fn test_donor_is_funded_implicitly() {
        let a = addr(0xaa);
        let provider = LocalChainProvider::new(1);
        let tx = TransactionEnvelope::value_transfer(DONOR_ADDRESS, a, eth(200), 1);
        let block = provider.latest_block().await.unwrap();

        let outcomes = provider.execute_chain(block, &[tx]).await.unwrap();
        assert!(outcomes[0].status.is_success());
    }
}
