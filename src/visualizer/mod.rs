//! Visualization / decoding pipeline
//!
//! Turns one transaction's raw execution outcome into typed, currency-aware
//! events: native balance before/after per touched address, decoded token
//! events in log-index order, and the facts the pure classifier needs
//! (captured here so classification and quarantine never touch the network).

pub mod decode;
pub mod identify;

pub use decode::decode_log;
pub use identify::{collapse_routes, identify_intent, TokenRoute, TransactionIntent};

use alloy_primitives::{Address, U256};
use eyre::Result;
use std::collections::HashMap;
use tracing::trace;

use crate::addressbook::{AddressBookLookup, AddressKind};
use crate::chain::{CallOutcome, CallStatus, ChainStateProvider, LogEntry, ValueTransfer, DONOR_ADDRESS};
use crate::simulation::state::{SimulationState, TransactionEnvelope};

/// Native balance movement for one address in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthBalanceChange {
    pub address: Address,
    pub before: U256,
    pub after: U256,
}

/// One decoded token event. `Unknown` keeps the raw log in the record so a
/// single undecodable log never hides the rest of a transaction's effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Erc20Transfer { token: Address, from: Address, to: Address, amount: U256 },
    Erc20Approval { token: Address, owner: Address, spender: Address, amount: U256 },
    Erc721Transfer { collection: Address, from: Address, to: Address, token_id: U256 },
    Erc721Approval { collection: Address, owner: Address, approved: Address, token_id: U256 },
    /// Collection-wide operator toggle
    ApprovalForAll { collection: Address, owner: Address, operator: Address, approved: bool },
    Unknown { log: LogEntry },
}

impl TokenEvent {
    pub fn is_decoded(&self) -> bool {
        !matches!(self, TokenEvent::Unknown { .. })
    }

    pub fn is_approval(&self) -> bool {
        matches!(
            self,
            TokenEvent::Erc20Approval { .. }
                | TokenEvent::Erc721Approval { .. }
                | TokenEvent::ApprovalForAll { approved: true, .. }
        )
    }

    /// The asset (token or collection) this event is about
    pub fn asset(&self) -> Option<Address> {
        match self {
            TokenEvent::Erc20Transfer { token, .. } | TokenEvent::Erc20Approval { token, .. } => {
                Some(*token)
            }
            TokenEvent::Erc721Transfer { collection, .. }
            | TokenEvent::Erc721Approval { collection, .. }
            | TokenEvent::ApprovalForAll { collection, .. } => Some(*collection),
            TokenEvent::Unknown { .. } => None,
        }
    }

    /// Spender/operator for approval-shaped events
    pub fn approval_target(&self) -> Option<Address> {
        match self {
            TokenEvent::Erc20Approval { spender, .. } => Some(*spender),
            TokenEvent::Erc721Approval { approved, .. } => Some(*approved),
            TokenEvent::ApprovalForAll { operator, approved: true, .. } => Some(*operator),
            _ => None,
        }
    }
}

/// Per the wallet convention: a simulated revert is a failure outcome, not an
/// engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Failure,
}

/// Typed view of one simulated transaction, positionally aligned with the
/// state's user transaction list. Everything the classifier and the
/// quarantine engine need is captured here, so both stay pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizerResult {
    pub status: StatusCode,
    /// Revert reason when `status == Failure`
    pub error: Option<String>,
    pub gas_used: u64,
    /// Every address whose native balance moved, in encounter order
    pub eth_balance_changes: Vec<EthBalanceChange>,
    /// Decoded token events in on-chain log-index order
    pub token_results: Vec<TokenEvent>,
    /// Raw native value movements (top-level and internal), kept for the
    /// silent-drain heuristic
    pub value_transfers: Vec<ValueTransfer>,
    pub sender: Address,
    pub recipient: Option<Address>,
    pub recipient_has_code: bool,
    pub recipient_kind: Option<AddressKind>,
    pub value: U256,
    pub input_empty: bool,
    /// Matches the rich-mode donor pattern
    pub from_donor: bool,
}

impl VisualizerResult {
    /// Token events that actually decoded, skipping `Unknown`
    pub fn decoded_events(&self) -> impl Iterator<Item = &TokenEvent> {
        self.token_results.iter().filter(|e| e.is_decoded())
    }
}

/// Running native-balance ledger across a transaction chain
struct BalanceLedger {
    balances: HashMap<Address, U256>,
}

impl BalanceLedger {
    fn get(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }

    /// Applies one outcome: fees always burn (a revert still pays for the gas
    /// it consumed), value moves only on success.
    fn apply(&mut self, tx: &TransactionEnvelope, outcome: &CallOutcome) {
        let fee = U256::from(outcome.gas_used) * U256::from(tx.max_fee_per_gas);
        let sender_balance = self.get(tx.from);
        self.balances.insert(tx.from, sender_balance.saturating_sub(fee));

        if !outcome.status.is_success() {
            return;
        }
        for transfer in &outcome.value_transfers {
            let from_balance = self.get(transfer.from);
            self.balances.insert(transfer.from, from_balance.saturating_sub(transfer.amount));
            let to_balance = self.get(transfer.to);
            self.balances.insert(transfer.to, to_balance.saturating_add(transfer.amount));
        }
    }
}

/// Addresses a transaction touches, in encounter order, no duplicates
fn touched_addresses(tx: &TransactionEnvelope, outcome: &CallOutcome) -> Vec<Address> {
    let mut seen = Vec::new();
    let mut push = |addr: Address| {
        if !seen.contains(&addr) {
            seen.push(addr);
        }
    };
    push(tx.from);
    if let Some(to) = tx.to {
        push(to);
    }
    for transfer in &outcome.value_transfers {
        push(transfer.from);
        push(transfer.to);
    }
    seen
}

/// Decodes the whole chain into one `VisualizerResult` per user transaction.
///
/// Deterministic given the state: the only provider traffic is anchor-block
/// balance and code-presence lookups; classification and quarantine then run
/// as pure functions over the returned results.
pub async fn visualize_transaction_chain<P: ChainStateProvider + ?Sized>(
    provider: &P,
    state: &SimulationState,
    addressbook: &dyn AddressBookLookup,
) -> Result<Vec<VisualizerResult>> {
    // Seed the ledger with anchor-block balances for every address the chain
    // touches anywhere.
    let mut ledger = BalanceLedger { balances: HashMap::new() };
    let pairs: Vec<(&TransactionEnvelope, &CallOutcome)> = state
        .prepend_queue
        .iter()
        .map(|p| (&p.transaction, &p.outcome))
        .chain(state.simulated_transactions.iter().map(|s| (&s.transaction, &s.outcome)))
        .collect();
    for (tx, outcome) in &pairs {
        for address in touched_addresses(tx, outcome) {
            if !ledger.balances.contains_key(&address) {
                let balance = provider.balance_at(address, state.block_number).await?;
                ledger.balances.insert(address, balance);
            }
        }
    }

    // Prepend-queue outcomes shape the ledger but produce no user-visible
    // results.
    for prepended in &state.prepend_queue {
        ledger.apply(&prepended.transaction, &prepended.outcome);
    }

    let mut results = Vec::with_capacity(state.simulated_transactions.len());
    for simulated in &state.simulated_transactions {
        let tx = &simulated.transaction;
        let outcome = &simulated.outcome;

        let order = touched_addresses(tx, outcome);
        let before: Vec<U256> = order.iter().map(|a| ledger.get(*a)).collect();
        ledger.apply(tx, outcome);

        let eth_balance_changes = if outcome.status.is_success() {
            order
                .iter()
                .zip(before)
                .filter_map(|(address, before)| {
                    let after = ledger.get(*address);
                    (before != after).then_some(EthBalanceChange { address: *address, before, after })
                })
                .collect()
        } else {
            // a revert caused no state change; no events exist
            Vec::new()
        };

        let token_results: Vec<TokenEvent> = outcome.logs.iter().map(decode_log).collect();

        let (recipient_has_code, recipient_kind) = match tx.to {
            Some(to) => (
                provider.has_code(to, state.block_number).await?,
                addressbook.lookup(to).map(|entry| entry.kind),
            ),
            None => (false, None),
        };

        trace!(
            sender = %tx.from,
            events = token_results.len(),
            balance_changes = eth_balance_changes.len(),
            "visualized transaction"
        );
        results.push(VisualizerResult {
            status: if outcome.status.is_success() {
                StatusCode::Success
            } else {
                StatusCode::Failure
            },
            error: outcome.status.revert_reason().map(str::to_string),
            gas_used: outcome.gas_used,
            eth_balance_changes,
            token_results,
            value_transfers: outcome.value_transfers.clone(),
            sender: tx.from,
            recipient: tx.to,
            recipient_has_code,
            recipient_kind,
            value: tx.value,
            input_empty: tx.input.is_empty(),
            from_donor: tx.from == DONOR_ADDRESS,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressbook::StaticAddressBook;
    use crate::chain::LocalChainProvider;
    use crate::simulation::state::{PrependedTransaction, SimulatedTransaction, Website};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn eth(units: u64) -> U256 {
        U256::from(units) * U256::from(10u8).pow(U256::from(18))
    }

    fn success_outcome(value_transfers: Vec<ValueTransfer>) -> CallOutcome {
        CallOutcome {
            status: CallStatus::Success,
            return_data: Default::default(),
            logs: Vec::new(),
            value_transfers,
            gas_used: 21_000,
        }
    }

    #[tokio::test]
    async fn test_balance_changes_reflect_prior_transactions() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let provider = LocalChainProvider::new(1).with_balance(a, eth(10));

        let t1 = TransactionEnvelope::value_transfer(a, b, eth(4), 1);
        let t2 = TransactionEnvelope::value_transfer(a, b, eth(1), 1);
        let state = SimulationState {
            chain_id: 1,
            block_number: 1,
            block_timestamp: 1_700_000_000,
            prepend_queue: Vec::new(),
            simulated_transactions: vec![
                SimulatedTransaction {
                    transaction: t1.clone(),
                    website: Website::new("https://a.example"),
                    outcome: success_outcome(vec![ValueTransfer { from: a, to: b, amount: eth(4) }]),
                },
                SimulatedTransaction {
                    transaction: t2,
                    website: Website::new("https://a.example"),
                    outcome: success_outcome(vec![ValueTransfer { from: a, to: b, amount: eth(1) }]),
                },
            ],
        };

        let book = StaticAddressBook::empty();
        let results = visualize_transaction_chain(&provider, &state, &book).await.unwrap();
        assert_eq!(results.len(), 2);

        // second transaction's "before" is the first transaction's "after"
        let first_a = &results[0].eth_balance_changes[0];
        assert_eq!((first_a.address, first_a.before, first_a.after), (a, eth(10), eth(6)));
        let second_a = &results[1].eth_balance_changes[0];
        assert_eq!((second_a.address, second_a.before, second_a.after), (a, eth(6), eth(5)));
    }

    #[tokio::test]
    async fn test_failed_transaction_has_no_events() {
        let a = addr(0xaa);
        let provider = LocalChainProvider::new(1);
        let tx = TransactionEnvelope::value_transfer(a, addr(0xbb), eth(1), 1);
        let state = SimulationState {
            chain_id: 1,
            block_number: 1,
            block_timestamp: 1_700_000_000,
            prepend_queue: Vec::new(),
            simulated_transactions: vec![SimulatedTransaction {
                transaction: tx,
                website: Website::new("https://a.example"),
                outcome: CallOutcome::reverted("insufficient funds for transfer", 21_000),
            }],
        };

        let book = StaticAddressBook::empty();
        let results = visualize_transaction_chain(&provider, &state, &book).await.unwrap();
        assert_eq!(results[0].status, StatusCode::Failure);
        assert_eq!(results[0].error.as_deref(), Some("insufficient funds for transfer"));
        assert!(results[0].eth_balance_changes.is_empty());
        assert!(results[0].token_results.is_empty());
    }

    #[tokio::test]
    async fn test_prepend_queue_feeds_the_ledger_but_stays_invisible() {
        let donor = DONOR_ADDRESS;
        let a = addr(0xaa);
        let b = addr(0xbb);
        let provider = LocalChainProvider::new(1);

        let donor_tx = TransactionEnvelope::value_transfer(donor, a, eth(200), 1);
        let user_tx = TransactionEnvelope::value_transfer(a, b, eth(1), 1);
        let state = SimulationState {
            chain_id: 1,
            block_number: 1,
            block_timestamp: 1_700_000_000,
            prepend_queue: vec![PrependedTransaction {
                transaction: donor_tx,
                outcome: success_outcome(vec![ValueTransfer { from: donor, to: a, amount: eth(200) }]),
            }],
            simulated_transactions: vec![SimulatedTransaction {
                transaction: user_tx,
                website: Website::new("https://a.example"),
                outcome: success_outcome(vec![ValueTransfer { from: a, to: b, amount: eth(1) }]),
            }],
        };

        let book = StaticAddressBook::empty();
        let results = visualize_transaction_chain(&provider, &state, &book).await.unwrap();
        // one result per USER transaction only
        assert_eq!(results.len(), 1);
        // a's before already includes the donor's 200 ETH
        let change_a = &results[0].eth_balance_changes[0];
        assert_eq!((change_a.before, change_a.after), (eth(200), eth(199)));
    }

    #[tokio::test]
    async fn test_idempotent_over_same_state() {
        let a = addr(0xaa);
        let b = addr(0xbb);
        let provider = LocalChainProvider::new(1).with_balance(a, eth(10));
        let state = SimulationState {
            chain_id: 1,
            block_number: 1,
            block_timestamp: 1_700_000_000,
            prepend_queue: Vec::new(),
            simulated_transactions: vec![SimulatedTransaction {
                transaction: TransactionEnvelope::value_transfer(a, b, eth(2), 1),
                website: Website::new("https://a.example"),
                outcome: success_outcome(vec![ValueTransfer { from: a, to: b, amount: eth(2) }]),
            }],
        };
        let book = StaticAddressBook::empty();
        let first = visualize_transaction_chain(&provider, &state, &book).await.unwrap();
        let second = visualize_transaction_chain(&provider, &state, &book).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_touched_addresses_in_encounter_order() {
        let a = addr(1);
        let b = addr(2);
        let c = addr(3);
        let tx = TransactionEnvelope::value_transfer(a, b, eth(1), 1);
        let outcome = success_outcome(vec![
            ValueTransfer { from: a, to: b, amount: eth(1) },
            ValueTransfer { from: b, to: c, amount: eth(1) },
        ]);
        assert_eq!(touched_addresses(&tx, &outcome), vec![a, b, c]);
    }
}
