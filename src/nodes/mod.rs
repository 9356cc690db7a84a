//! Pipeline nodes. Each node consumes and produces data only; routing
//! between nodes is owned entirely by the orchestration driver.

pub mod classifier;
pub mod pruner;
pub mod retriever;
pub mod synthesizer;
