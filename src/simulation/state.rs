//! Simulation state model
//!
//! A `SimulationState` is an immutable value: every mutation (append, remove,
//! re-prepend) produces a brand-new state with freshly computed outcomes for
//! every transaction, because later transactions' effects depend on earlier
//! ones. `Clone` is the deep copy - all fields are owned.
//!
//! Invariants:
//! - `simulated_transactions` never contains a transaction already present in
//!   the prepend queue (content-hash disjoint)
//! - anchor block number/timestamp are monotonically non-decreasing across
//!   replacements within one chain session

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::Encodable;

use crate::chain::{BlockHandle, CallOutcome};

/// Transaction envelope as submitted by a website. No signature is required
/// or checked in simulation mode - the sender field is taken at face value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub from: Address,
    /// `None` means contract deployment
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub nonce: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub chain_id: u64,
}

impl TransactionEnvelope {
    /// Plain value transfer with no calldata
    pub fn value_transfer(from: Address, to: Address, value: U256, chain_id: u64) -> Self {
        Self {
            from,
            to: Some(to),
            value,
            input: Bytes::new(),
            gas_limit: 21_000,
            nonce: 0,
            max_fee_per_gas: 0,
            max_priority_fee_per_gas: 0,
            chain_id,
        }
    }

    /// Contract call carrying calldata
    pub fn contract_call(from: Address, to: Address, input: Bytes, chain_id: u64) -> Self {
        Self {
            from,
            to: Some(to),
            value: U256::ZERO,
            input,
            gas_limit: 500_000,
            nonce: 0,
            max_fee_per_gas: 0,
            max_priority_fee_per_gas: 0,
            chain_id,
        }
    }

    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }

    /// Content hash identifying this transaction inside a simulation. RLP
    /// field encoding under keccak256; unsigned, so this is NOT the hash the
    /// transaction would have on a real chain.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(128);
        self.from.encode(&mut buf);
        match self.to {
            Some(to) => to.encode(&mut buf),
            // RLP empty string marks a deployment
            None => buf.push(0x80),
        }
        self.value.encode(&mut buf);
        self.input.encode(&mut buf);
        self.gas_limit.encode(&mut buf);
        self.nonce.encode(&mut buf);
        self.max_fee_per_gas.encode(&mut buf);
        self.max_priority_fee_per_gas.encode(&mut buf);
        self.chain_id.encode(&mut buf);
        keccak256(&buf)
    }
}

/// Which origin asked for this transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Website {
    pub origin: String,
    pub title: Option<String>,
}

impl Website {
    pub fn new(origin: &str) -> Self {
        Self { origin: origin.to_string(), title: None }
    }
}

/// A user-initiated pending transaction plus its latest execution outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTransaction {
    pub transaction: TransactionEnvelope,
    pub website: Website,
    /// Raw outcome from the last atomic execution run; recomputed wholesale
    /// whenever the chain changes.
    pub outcome: CallOutcome,
}

/// A prepend-queue transaction (rich-mode faucet). Always executed before all
/// user transactions, never shown to the user; its outcome is kept only so
/// downstream balance accounting stays correct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrependedTransaction {
    pub transaction: TransactionEnvelope,
    pub outcome: CallOutcome,
}

/// What the chain would look like if this ordered set of not-yet-broadcast
/// transactions were mined next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationState {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub prepend_queue: Vec<PrependedTransaction>,
    pub simulated_transactions: Vec<SimulatedTransaction>,
}

impl SimulationState {
    /// Fresh state with no pending transactions, anchored at `block`
    pub fn empty(chain_id: u64, block: BlockHandle) -> Self {
        Self {
            chain_id,
            block_number: block.number,
            block_timestamp: block.timestamp,
            prepend_queue: Vec::new(),
            simulated_transactions: Vec::new(),
        }
    }

    pub fn anchor(&self) -> BlockHandle {
        BlockHandle { number: self.block_number, timestamp: self.block_timestamp }
    }

    /// Content hashes of the user-visible transaction list, in order
    pub fn transaction_hashes(&self) -> Vec<B256> {
        self.simulated_transactions.iter().map(|tx| tx.transaction.hash()).collect()
    }

    /// Whether `hash` is present in either the prepend queue or the user list
    pub fn contains(&self, hash: B256) -> bool {
        self.prepend_queue.iter().any(|tx| tx.transaction.hash() == hash)
            || self.simulated_transactions.iter().any(|tx| tx.transaction.hash() == hash)
    }

    /// Envelopes of the prepend queue, in execution order
    pub fn prepend_envelopes(&self) -> Vec<TransactionEnvelope> {
        self.prepend_queue.iter().map(|tx| tx.transaction.clone()).collect()
    }

    /// (envelope, website) pairs of the user list, in execution order
    pub fn user_transactions(&self) -> Vec<(TransactionEnvelope, Website)> {
        self.simulated_transactions
            .iter()
            .map(|tx| (tx.transaction.clone(), tx.website.clone()))
            .collect()
    }

    /// The full execution order: prepend queue first, then user transactions
    pub fn full_chain(&self) -> Vec<TransactionEnvelope> {
        let mut chain = self.prepend_envelopes();
        chain.extend(self.simulated_transactions.iter().map(|tx| tx.transaction.clone()));
        chain
    }
}
