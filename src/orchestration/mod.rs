//! The pipeline driver and its supporting machinery: a closed finite-state
//! machine over the nodes, typed stage hooks, and the durable knowledge
//! write-back queue.

pub mod driver;
pub mod hooks;
pub mod scheduler;

pub use driver::{PipelineDriver, StageOutcome, transition};
pub use hooks::StageHook;
pub use scheduler::{KnowledgeUpdate, UpdateScheduler};
