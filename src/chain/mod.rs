//! Chain-state provider abstraction
//!
//! The simulation core never talks a wire format itself; it consumes this
//! trait. The one non-negotiable contract is `execute_chain`: the whole
//! ordered transaction list goes out in ONE round trip and is executed
//! sequentially against a single snapshot, each entry's post-state feeding
//! the next entry's pre-state. N sequential calls would let real-world
//! activity interleave between entries and break the "as if mined
//! consecutively in the next block" guarantee.

pub mod http;
pub mod local;

pub use http::HttpChainProvider;
pub use local::LocalChainProvider;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::Result;

use crate::simulation::state::TransactionEnvelope;

/// Pseudo-sender of the rich-mode donor transaction. Not a real account;
/// providers grant it funds out of thin air (state override) so the faucet
/// transfer never reverts.
pub const DONOR_ADDRESS: Address = address!("000000000000000000000000000000000000face");

/// Balance granted to [`DONOR_ADDRESS`] inside a simulation (1e9 ETH).
pub fn donor_reserve() -> U256 {
    U256::from(10u8).pow(U256::from(27))
}

/// The real chain block a simulation is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub number: u64,
    pub timestamp: u64,
}

/// One raw emitted log, undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// A native-currency movement observed during execution (top-level value or
/// an internal transfer surfaced by the provider's trace)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// Per-transaction execution status. A revert is a normal outcome, not an
/// error: it flows through classification and quarantine like any other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Revert { reason: String },
}

impl CallStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CallStatus::Success)
    }

    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            CallStatus::Success => None,
            CallStatus::Revert { reason } => Some(reason),
        }
    }
}

/// Raw per-transaction outcome of one atomic batched execution run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub return_data: Bytes,
    /// Emitted logs in on-chain (log index) order. Empty on revert.
    pub logs: Vec<LogEntry>,
    /// Native value movements in the order they happened. Empty on revert.
    pub value_transfers: Vec<ValueTransfer>,
    pub gas_used: u64,
}

impl CallOutcome {
    pub fn reverted(reason: impl Into<String>, gas_used: u64) -> Self {
        Self {
            status: CallStatus::Revert { reason: reason.into() },
            return_data: Bytes::new(),
            logs: Vec::new(),
            value_transfers: Vec::new(),
            gas_used,
        }
    }
}

/// What the simulation core needs from a chain node (or a stand-in for one)
#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    /// Chain this provider is connected to; switching chains means a new
    /// provider instance, never a mutated one.
    fn chain_id(&self) -> u64;

    /// Current head block number and timestamp
    async fn latest_block(&self) -> Result<BlockHandle>;

    /// Execute `transactions` in order against a snapshot at `block`,
    /// applying state diffs sequentially, in a single request/response round
    /// trip. A revert at entry k must contribute no state change, but entries
    /// k+1.. still execute. Must return exactly one outcome per entry.
    async fn execute_chain(
        &self,
        block: BlockHandle,
        transactions: &[TransactionEnvelope],
    ) -> Result<Vec<CallOutcome>>;

    /// Native balance of `address` at block `block`
    async fn balance_at(&self, address: Address, block: u64) -> Result<U256>;

    /// Whether `address` has contract code at block `block`
    async fn has_code(&self, address: Address, block: u64) -> Result<bool>;
}
