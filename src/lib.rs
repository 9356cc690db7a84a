//! weave: a hybrid context-retrieval pipeline.
//!
//! A query flows through a small finite-state machine: intent
//! classification, retrieval fan-out across a fast local index and a slow
//! global knowledge store, an approval gate in front of mutating global
//! operations, token-budget pruning, and final synthesis. Every run is
//! checkpointed to disk so a suspended run can be resumed in a later
//! process.

pub mod backend;
pub mod config;
pub mod errors;
pub mod gate;
pub mod nodes;
pub mod orchestration;
pub mod state;
