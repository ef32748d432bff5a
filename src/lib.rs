//! Warden - pre-flight transaction simulation and threat triage
//!
//! Predicts what a pending transaction (or an ordered chain of pending
//! transactions) would do by executing it against a replica of live chain
//! state, decodes the raw outcome into typed balance/token events, classifies
//! the transaction's intent, and flags suspicious effects with quarantine
//! codes - all before anything is broadcast.
//!
//! Pipeline: `chain` (state provider) -> `simulation` (state model + atomic
//! execution + serialized owner) -> `visualizer` (decoding, classification)
//! -> `quarantine` (heuristics).

pub mod addressbook;
pub mod chain;
pub mod config;
pub mod quarantine;
pub mod simulation;
pub mod visualizer;

pub use addressbook::{AddressBookEntry, AddressBookLookup, AddressKind, StaticAddressBook};
pub use chain::{BlockHandle, CallOutcome, CallStatus, ChainStateProvider};
pub use config::Config;
pub use quarantine::{QuarantineCode, QuarantinePolicy};
pub use simulation::controller::{Evaluation, Simulator};
pub use simulation::engine::ExecutionEngine;
pub use simulation::state::{SimulationState, TransactionEnvelope, Website};
pub use visualizer::identify::TransactionIntent;
pub use visualizer::VisualizerResult;
