//! Typed error hierarchy for the weave pipeline.
//!
//! Two top-level enums cover the two failure scopes:
//! - `BackendError` — a single backend call failed; isolated and aggregated
//!   by the retrieval fan-out, never fatal on its own.
//! - `PipelineError` — the run itself cannot continue; always surfaced to
//!   the caller inside a `RunOutcome::Failed`.

use thiserror::Error;

/// Failure of a single backend call.
///
/// The fan-out collects these per backend; a run only fails when every
/// requested backend produced one.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend '{backend}' timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("backend '{backend}' is unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("backend '{backend}' does not support this operation: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("backend '{backend}' search failed: {source}")]
    Search {
        backend: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BackendError {
    /// The identifier of the backend that produced this error.
    pub fn backend(&self) -> &str {
        match self {
            BackendError::Timeout { backend, .. }
            | BackendError::Unavailable { backend, .. }
            | BackendError::Unsupported { backend, .. }
            | BackendError::Search { backend, .. } => backend,
        }
    }
}

/// Run-terminal errors. Every variant maps to a distinct caller-visible
/// failure mode; none of them is retried inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Nothing to classify: the conversation is empty.
    #[error("empty conversation: nothing to classify")]
    EmptyInput,

    /// Every requested backend failed; per-backend causes are preserved.
    #[error("all requested backends failed: [{}]", format_causes(causes))]
    Retrieval { causes: Vec<BackendError> },

    /// An internal invariant was violated. Programming error; fail fast.
    #[error("pipeline precondition violated: {0}")]
    Precondition(String),

    /// A human or policy rejected a mutating operation. Terminal and
    /// user-visible, distinct from a technical failure.
    #[error("operation rejected: {reason}")]
    Rejected { reason: String },

    /// The whole run exceeded its wall-clock budget.
    #[error("run exceeded wall-clock timeout of {timeout_secs}s")]
    RunTimeout { timeout_secs: u64 },

    /// The external generation capability failed. No internal retry.
    #[error("synthesis failed: {0}")]
    Synthesis(#[source] anyhow::Error),

    /// `resume` was called with a run id that has no checkpoint.
    #[error("unknown run id '{0}'")]
    UnknownRun(String),

    /// `resume` was called on a run that is not awaiting approval.
    #[error("run '{0}' is not awaiting approval")]
    NotSuspended(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_causes(causes: &[BackendError]) -> String {
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
