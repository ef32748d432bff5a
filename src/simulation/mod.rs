//! The simulation core
//!
//! - `state`: "real chain state plus an ordered, pending, not-yet-broadcast
//!   transaction list" as a pure, copyable value
//! - `engine`: rebuilds and re-executes the whole chain atomically on every
//!   mutation
//! - `controller`: the single serialized owner of the published state

pub mod controller;
pub mod engine;
pub mod state;

pub use controller::{Evaluation, Simulator};
pub use engine::ExecutionEngine;
pub use state::{SimulatedTransaction, SimulationState, TransactionEnvelope, Website};
