//! Pipeline state: the single mutable record threaded through every stage,
//! plus the closed set of stages the driver moves it through.

mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointStore, PersistedOutcome};

use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// The classified routing decision for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Local,
    Global,
    Hybrid,
    Unknown,
}

impl Intent {
    /// Whether the local backend is queried for this intent.
    ///
    /// UNKNOWN routes as LOCAL: the cheaper, safer path.
    pub fn needs_local(&self) -> bool {
        matches!(self, Intent::Local | Intent::Hybrid | Intent::Unknown)
    }

    /// Whether the global backend is queried for this intent.
    pub fn needs_global(&self) -> bool {
        matches!(self, Intent::Global | Intent::Hybrid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Local => "local",
            Intent::Global => "global",
            Intent::Hybrid => "hybrid",
            Intent::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who said a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn. The conversation is append-only; each stage may
/// append at most one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A unit of retrieved context.
///
/// Documents are created only by backend `search()` calls, never mutated,
/// and dropped (not edited) by pruning. `relevance_rank` is the backend's
/// own ordering, lower-is-better, with insertion order as the tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Backend identifier, e.g. "local" or "global".
    pub source: String,
    pub text: String,
    /// Cost unit for budgeting: whitespace-delimited token count, computed
    /// once at construction and immutable afterwards.
    pub approximate_size: usize,
    pub relevance_rank: usize,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>, relevance_rank: usize) -> Self {
        let text = text.into();
        let approximate_size = text.split_whitespace().count();
        Self {
            source: source.into(),
            text,
            approximate_size,
            relevance_rank,
        }
    }
}

/// State of an approval request. Transitions exactly once, externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// The decision an external caller supplies through `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Created by the approval gate when a mutating global operation is
/// detected; lives in `PipelineState::pending_approval` while the run is
/// suspended and is cleared once a decision is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// Human-readable summary of the risky operation.
    pub description: String,
    /// The mutating verb that triggered the gate.
    pub matched_verb: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(description: impl Into<String>, matched_verb: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            matched_verb: matched_verb.into(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// Non-fatal markers recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A backend returned more than its token budget allowed; the tail was
    /// truncated and processing continued.
    BudgetExceeded {
        backend: String,
        budget: usize,
        accepted: usize,
        dropped: usize,
    },
    /// A backend failed but at least one other succeeded.
    BackendFailed { backend: String, message: String },
}

/// The single mutable record threaded through every stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Ordered conversation history. Append-only.
    pub conversation: Vec<Message>,
    /// Optional file/entity the query concerns. Owned by the caller,
    /// read-only to the pipeline.
    pub current_subject: Option<String>,
    /// Accumulated by retrieval stages, consumed and replaced by the pruner.
    pub retrieved_documents: Vec<Document>,
    /// Set exactly once by the intent classifier.
    pub intent: Option<Intent>,
    /// Backend identifiers already queried in this run.
    pub backends_invoked: BTreeSet<String>,
    /// Non-null only while the pipeline is suspended.
    pub pending_approval: Option<ApprovalRequest>,
    /// Set by the pruner; the synthesizer refuses to run without it.
    pub pruned: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineState {
    pub fn new(query: impl Into<String>, current_subject: Option<String>) -> Self {
        Self {
            conversation: vec![Message::user(query)],
            current_subject,
            retrieved_documents: Vec::new(),
            intent: None,
            backends_invoked: BTreeSet::new(),
            pending_approval: None,
            pruned: false,
            diagnostics: Vec::new(),
        }
    }

    /// The latest user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
    }

    /// Record the classified intent. Fails if already set: intent is
    /// written exactly once per run.
    pub fn set_intent(&mut self, intent: Intent) -> Result<(), PipelineError> {
        if self.intent.is_some() {
            return Err(PipelineError::Precondition(
                "intent already classified for this run".to_string(),
            ));
        }
        self.intent = Some(intent);
        Ok(())
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.conversation.push(Message::assistant(text));
    }
}

/// Logical stages of the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Classify,
    Retrieve,
    AwaitingApproval,
    Prune,
    Synthesize,
    Done,
    Failed,
    Rejected,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed | Stage::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Classify => "classify",
            Stage::Retrieve => "retrieve",
            Stage::AwaitingApproval => "awaiting_approval",
            Stage::Prune => "prune",
            Stage::Synthesize => "synthesize",
            Stage::Done => "done",
            Stage::Failed => "failed",
            Stage::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a caller gets back from `run` or `resume`. Always discriminated:
/// never an ambiguous partial success.
#[derive(Debug)]
pub enum RunOutcome {
    FinalAnswer(String),
    AwaitingApproval(ApprovalRequest),
    Rejected(String),
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn is_final_answer(&self) -> bool {
        matches!(self, RunOutcome::FinalAnswer(_))
    }
}
