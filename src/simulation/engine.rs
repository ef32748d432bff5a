//! Atomic execution engine
//!
//! Every mutation rebuilds the FULL ordered list (prepend queue + user
//! transactions + the change) and issues one batched provider call. This is
//! intentional, not accidental inefficiency: removing or inserting a
//! transaction in the middle changes every later transaction's effects, so a
//! partial patch can never be correct. Each operation is a pure function from
//! old state to new state - if the provider round trip fails or times out,
//! the caller's old state is untouched because nothing here mutates it.

use alloy_primitives::B256;
use eyre::{bail, ensure, eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::state::{
    PrependedTransaction, SimulatedTransaction, SimulationState, TransactionEnvelope, Website,
};
use crate::chain::{BlockHandle, CallOutcome, ChainStateProvider};

pub struct ExecutionEngine<P> {
    provider: Arc<P>,
    /// Bound on the single suspension point (the batched call) so a dead
    /// node cannot wedge the caller's serialization gate.
    call_timeout: Duration,
}

impl<P: ChainStateProvider> ExecutionEngine<P> {
    pub fn new(provider: Arc<P>, call_timeout: Duration) -> Self {
        Self { provider, call_timeout }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// One timeout-bounded atomic round trip
    async fn execute(
        &self,
        anchor: BlockHandle,
        chain: &[TransactionEnvelope],
    ) -> Result<Vec<CallOutcome>> {
        let outcomes =
            tokio::time::timeout(self.call_timeout, self.provider.execute_chain(anchor, chain))
                .await
                .map_err(|_| {
                    eyre!(
                        "chain-state provider timed out after {:?}; previous state stands",
                        self.call_timeout
                    )
                })??;
        ensure!(
            outcomes.len() == chain.len(),
            "provider returned {} outcomes for {} transactions",
            outcomes.len(),
            chain.len()
        );
        Ok(outcomes)
    }

    /// Re-derives a complete state from scratch: prepend queue first, then
    /// user transactions, every outcome freshly computed.
    async fn rebuild(
        &self,
        chain_id: u64,
        anchor: BlockHandle,
        prepend: Vec<TransactionEnvelope>,
        users: Vec<(TransactionEnvelope, Website)>,
    ) -> Result<SimulationState> {
        let mut full: Vec<TransactionEnvelope> = prepend.clone();
        full.extend(users.iter().map(|(tx, _)| tx.clone()));

        debug!(
            block = anchor.number,
            prepended = prepend.len(),
            user = users.len(),
            "re-executing full transaction chain"
        );
        let outcomes = self.execute(anchor, &full).await?;
        let (prepend_outcomes, user_outcomes) = outcomes.split_at(prepend.len());

        Ok(SimulationState {
            chain_id,
            block_number: anchor.number,
            block_timestamp: anchor.timestamp,
            prepend_queue: prepend
                .into_iter()
                .zip(prepend_outcomes.iter().cloned())
                .map(|(transaction, outcome)| PrependedTransaction { transaction, outcome })
                .collect(),
            simulated_transactions: users
                .into_iter()
                .zip(user_outcomes.iter().cloned())
                .map(|((transaction, website), outcome)| SimulatedTransaction {
                    transaction,
                    website,
                    outcome,
                })
                .collect(),
        })
    }

    /// Appends `tx` after all existing user transactions and re-executes
    pub async fn append(
        &self,
        state: &SimulationState,
        tx: TransactionEnvelope,
        website: Website,
    ) -> Result<SimulationState> {
        let hash = tx.hash();
        ensure!(
            !state.prepend_queue.iter().any(|p| p.transaction.hash() == hash),
            "transaction {hash} is already in the prepend queue"
        );
        let mut users = state.user_transactions();
        users.push((tx, website));
        self.rebuild(state.chain_id, state.anchor(), state.prepend_envelopes(), users).await
    }

    /// Drops the first user transaction whose content hash equals `hash` and
    /// re-executes the remaining chain. Unknown hashes leave the list as-is.
    pub async fn remove_transaction(
        &self,
        state: &SimulationState,
        hash: B256,
    ) -> Result<SimulationState> {
        let mut users = state.user_transactions();
        let position = users.iter().position(|(tx, _)| tx.hash() == hash);
        match position {
            Some(index) => {
                users.remove(index);
            }
            None => {
                debug!(%hash, "remove requested for unknown transaction; state unchanged");
                return Ok(state.clone());
            }
        }
        self.rebuild(state.chain_id, state.anchor(), state.prepend_envelopes(), users).await
    }

    /// Replaces the prepend queue and re-executes everything. User
    /// transactions colliding with the new queue are dropped to keep the two
    /// lists disjoint.
    pub async fn set_prepend_queue(
        &self,
        state: &SimulationState,
        queue: Vec<TransactionEnvelope>,
    ) -> Result<SimulationState> {
        let queued: Vec<B256> = queue.iter().map(|tx| tx.hash()).collect();
        let mut users = state.user_transactions();
        users.retain(|(tx, _)| {
            let keep = !queued.contains(&tx.hash());
            if !keep {
                warn!(hash = %tx.hash(), "user transaction shadowed by new prepend queue; dropping");
            }
            keep
        });
        self.rebuild(state.chain_id, state.anchor(), queue, users).await
    }

    /// Re-anchors the same transaction list on the provider's current head.
    /// The anchor never moves backwards within a chain session.
    pub async fn refresh(&self, state: &SimulationState) -> Result<SimulationState> {
        let head = self.provider.latest_block().await?;
        let anchor = if head.number < state.block_number {
            warn!(
                head = head.number,
                anchor = state.block_number,
                "provider head is behind the simulation anchor; keeping anchor"
            );
            state.anchor()
        } else {
            head
        };
        self.rebuild(state.chain_id, anchor, state.prepend_envelopes(), state.user_transactions())
            .await
    }

    /// Best-effort gas estimate for appending `tx`: simulate the full chain
    /// with `tx` at the end and pad the observed usage. An estimate, never a
    /// guarantee - a real miner may charge more or less.
    pub async fn estimate_gas_for_append(
        &self,
        state: &SimulationState,
        tx: &TransactionEnvelope,
    ) -> Result<u64> {
        let mut full = state.full_chain();
        full.push(tx.clone());
        let outcomes = self.execute(state.anchor(), &full).await?;
        let last = outcomes.last().ok_or_else(|| eyre!("provider returned no outcomes"))?;
        if !last.status.is_success() {
            bail!(
                "cannot estimate gas: transaction reverts ({})",
                last.status.revert_reason().unwrap_or("no reason")
            );
        }
        // 25% headroom over the simulated usage
        Ok(last.gas_used + last.gas_used / 4)
    }
}
