//! Simulation session controller
//!
//! Owns the published `SimulationState` and serializes every mutation behind
//! one async mutex held across the provider round trip. Readers get cheap
//! clones of the last published value plus a sequence number, so a consumer
//! can tell a stale evaluation from a current one without ever blocking a
//! writer.

use alloy_primitives::{Address, B256, U256};
use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::engine::ExecutionEngine;
use super::state::{SimulationState, TransactionEnvelope, Website};
use crate::addressbook::AddressBookLookup;
use crate::chain::{ChainStateProvider, DONOR_ADDRESS};
use crate::quarantine::{self, QuarantineCode, QuarantinePolicy};
use crate::visualizer::{
    identify_intent, visualize_transaction_chain, TransactionIntent, VisualizerResult,
};

/// Last state handed out to readers. `seq` increments on every publish, so a
/// result computed against an older state is detectably stale.
struct Published {
    state: SimulationState,
    seq: u64,
}

/// One user transaction with everything the caller needs to render a verdict
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedTransaction {
    pub transaction: TransactionEnvelope,
    pub website: Website,
    pub result: VisualizerResult,
    pub intent: TransactionIntent,
    pub quarantine: Vec<QuarantineCode>,
}

/// Full decoded view of one published state
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Sequence number of the state this was computed from
    pub seq: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transactions: Vec<EvaluatedTransaction>,
}

pub struct Simulator<P> {
    engine: ExecutionEngine<P>,
    call_timeout: Duration,
    published: Mutex<Published>,
    /// Wei granted per rich-mode funding transaction
    donor_amount: U256,
}

impl<P: ChainStateProvider> Simulator<P> {
    /// Anchors an empty session at the provider's current head
    pub async fn new(provider: Arc<P>, call_timeout: Duration, donor_amount: U256) -> Result<Self> {
        let block = provider.latest_block().await?;
        let state = SimulationState::empty(provider.chain_id(), block);
        info!(chain_id = state.chain_id, block = state.block_number, "simulation session anchored");
        Ok(Self {
            engine: ExecutionEngine::new(provider, call_timeout),
            call_timeout,
            published: Mutex::new(Published { state, seq: 0 }),
            donor_amount,
        })
    }

    /// Clone of the last published state
    pub async fn current(&self) -> SimulationState {
        self.published.lock().await.state.clone()
    }

    pub async fn sequence(&self) -> u64 {
        self.published.lock().await.seq
    }

    fn donor_transaction(&self, beneficiary: Address, chain_id: u64) -> TransactionEnvelope {
        TransactionEnvelope::value_transfer(DONOR_ADDRESS, beneficiary, self.donor_amount, chain_id)
    }

    /// Appends a user transaction and publishes the re-executed state
    pub async fn append_transaction(
        &self,
        tx: TransactionEnvelope,
        website: Website,
    ) -> Result<SimulationState> {
        let mut published = self.published.lock().await;
        let next = self.engine.append(&published.state, tx, website).await?;
        Ok(Self::publish(&mut published, next))
    }

    /// Removes the first user transaction matching `hash` and publishes
    pub async fn remove_transaction(&self, hash: B256) -> Result<SimulationState> {
        let mut published = self.published.lock().await;
        let next = self.engine.remove_transaction(&published.state, hash).await?;
        Ok(Self::publish(&mut published, next))
    }

    /// Turns rich-mode funding for `beneficiary` on or off. Enabling replaces
    /// the prepend queue with a single donor transfer; disabling empties it.
    /// Either way the full chain re-executes atomically.
    pub async fn set_rich_mode(&self, enabled: bool, beneficiary: Address) -> Result<SimulationState> {
        let mut published = self.published.lock().await;
        let queue = if enabled {
            vec![self.donor_transaction(beneficiary, published.state.chain_id)]
        } else {
            Vec::new()
        };
        debug!(enabled, %beneficiary, "rich mode toggled");
        let next = self.engine.set_prepend_queue(&published.state, queue).await?;
        Ok(Self::publish(&mut published, next))
    }

    /// Re-anchors the current transaction list on the provider's head
    pub async fn refresh(&self) -> Result<SimulationState> {
        let mut published = self.published.lock().await;
        let next = self.engine.refresh(&published.state).await?;
        Ok(Self::publish(&mut published, next))
    }

    /// Drops all user transactions, keeps the prepend queue, re-anchors at the
    /// provider's head. The anchor never moves backwards within a chain
    /// session, even when a lagging node reports an older head.
    pub async fn reset(&self) -> Result<SimulationState> {
        let mut published = self.published.lock().await;
        let head = self.engine.provider().latest_block().await?;
        let anchor = if head.number < published.state.block_number {
            warn!(
                head = head.number,
                anchor = published.state.block_number,
                "provider head is behind the simulation anchor; keeping anchor"
            );
            published.state.anchor()
        } else {
            head
        };
        let empty = SimulationState::empty(published.state.chain_id, anchor);
        let next =
            self.engine.set_prepend_queue(&empty, published.state.prepend_envelopes()).await?;
        Ok(Self::publish(&mut published, next))
    }

    /// Abandons the session and re-anchors on a different chain's provider.
    /// Requires exclusive access: pending transactions from the old chain
    /// have no meaning on the new one and are discarded.
    pub async fn switch_chain(&mut self, provider: Arc<P>) -> Result<SimulationState> {
        let block = provider.latest_block().await?;
        let state = SimulationState::empty(provider.chain_id(), block);
        info!(chain_id = state.chain_id, block = state.block_number, "switched chain");
        self.engine = ExecutionEngine::new(provider, self.call_timeout);
        let published = self.published.get_mut();
        Ok(Self::publish(published, state))
    }

    /// Gas estimate for appending `tx` to the current state, without
    /// publishing anything
    pub async fn estimate_gas(&self, tx: &TransactionEnvelope) -> Result<u64> {
        let state = self.current().await;
        self.engine.estimate_gas_for_append(&state, tx).await
    }

    /// Decodes, classifies and quarantine-checks every user transaction of
    /// the last published state. Read-only: concurrent mutations publish new
    /// states, and the returned `seq` tells the caller which one this covers.
    pub async fn evaluate(
        &self,
        addressbook: &dyn AddressBookLookup,
        policy: &QuarantinePolicy,
    ) -> Result<Evaluation> {
        let (state, seq) = {
            let published = self.published.lock().await;
            (published.state.clone(), published.seq)
        };
        let results =
            visualize_transaction_chain(self.engine.provider().as_ref(), &state, addressbook)
                .await?;
        let verdicts = quarantine::inspect_chain(&results, addressbook, policy);

        let transactions = state
            .simulated_transactions
            .into_iter()
            .zip(results.into_iter().zip(verdicts))
            .map(|(simulated, (result, codes))| EvaluatedTransaction {
                intent: identify_intent(&result),
                transaction: simulated.transaction,
                website: simulated.website,
                result,
                quarantine: codes,
            })
            .collect();
        Ok(Evaluation {
            seq,
            chain_id: state.chain_id,
            block_number: state.block_number,
            transactions,
        })
    }

    fn publish(published: &mut Published, next: SimulationState) -> SimulationState {
        published.state = next;
        published.seq += 1;
        debug!(
            seq = published.seq,
            transactions = published.state.simulated_transactions.len(),
            "published new simulation state"
        );
        published.state.clone()
    }
}
