//! Typed extension point around stage execution.
//!
//! Instead of an open-ended middleware list, the driver carries a fixed
//! list of `StageHook`s with a closed signature. Hooks observe; they never
//! route — routing stays with the driver's transition table.

use crate::state::{PipelineState, Stage};

/// Callbacks invoked around every stage the driver executes. Both default
/// to no-ops so implementors override only what they need.
pub trait StageHook: Send + Sync {
    fn before_stage(&self, _stage: Stage, _state: &PipelineState) {}
    fn after_stage(&self, _stage: Stage, _state: &PipelineState) {}
}

/// Hook that logs stage boundaries through `tracing`.
pub struct TraceHook;

impl StageHook for TraceHook {
    fn before_stage(&self, stage: Stage, _state: &PipelineState) {
        tracing::debug!(stage = %stage, "stage starting");
    }

    fn after_stage(&self, stage: Stage, state: &PipelineState) {
        tracing::debug!(
            stage = %stage,
            documents = state.retrieved_documents.len(),
            "stage finished"
        );
    }
}
