//! The pipeline driver: a finite-state machine over the nodes.
//!
//! Nodes return data; all routing is decided here, from the closed
//! `(stage, outcome)` transition table. The driver owns checkpointing, the
//! approval suspension/resume protocol, the optional whole-run timeout,
//! and the post-run knowledge write-back.

use crate::backend::BackendSet;
use crate::config::WeaveConfig;
use crate::errors::PipelineError;
use crate::gate::{self, ApprovalToken, Decided};
use crate::nodes::synthesizer::Generator;
use crate::nodes::{classifier, pruner, retriever, synthesizer};
use crate::orchestration::hooks::StageHook;
use crate::orchestration::scheduler::{KnowledgeUpdate, UpdateScheduler};
use crate::state::{
    ApprovalDecision, ApprovalRequest, Checkpoint, CheckpointStore, PersistedOutcome,
    PipelineState, RunOutcome, Stage,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What a stage reported back to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Started,
    Classified,
    Retrieved,
    Suspended,
    ApprovalGranted,
    ApprovalRejected,
    Pruned,
    Synthesized,
}

/// The closed transition table. Returns `None` for combinations the
/// machine can never legally produce; the driver fails such runs fast.
pub fn transition(stage: Stage, outcome: StageOutcome) -> Option<Stage> {
    match (stage, outcome) {
        (Stage::Start, StageOutcome::Started) => Some(Stage::Classify),
        (Stage::Classify, StageOutcome::Classified) => Some(Stage::Retrieve),
        (Stage::Retrieve, StageOutcome::Suspended) => Some(Stage::AwaitingApproval),
        (Stage::Retrieve, StageOutcome::Retrieved) => Some(Stage::Prune),
        (Stage::AwaitingApproval, StageOutcome::ApprovalGranted) => Some(Stage::Retrieve),
        (Stage::AwaitingApproval, StageOutcome::ApprovalRejected) => Some(Stage::Rejected),
        (Stage::Prune, StageOutcome::Pruned) => Some(Stage::Synthesize),
        (Stage::Synthesize, StageOutcome::Synthesized) => Some(Stage::Done),
        _ => None,
    }
}

/// Drives one query through classify, retrieve, gate, prune, and
/// synthesize. One driver serves many concurrent runs; runs share nothing
/// mutable beyond the read-only backend handles.
pub struct PipelineDriver {
    config: WeaveConfig,
    backends: BackendSet,
    generator: Arc<dyn Generator>,
    checkpoints: CheckpointStore,
    hooks: Vec<Box<dyn StageHook>>,
    updates: Option<Arc<UpdateScheduler>>,
}

impl PipelineDriver {
    pub fn new(config: WeaveConfig, backends: BackendSet, generator: Arc<dyn Generator>) -> Self {
        let checkpoints = CheckpointStore::new(config.checkpoint.dir.clone());
        Self {
            config,
            backends,
            generator,
            checkpoints,
            hooks: Vec::new(),
            updates: None,
        }
    }

    pub fn with_hook(mut self, hook: Box<dyn StageHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Inject the knowledge write-back queue. Without one, completed runs
    /// simply skip the write-back.
    pub fn with_update_scheduler(mut self, scheduler: Arc<UpdateScheduler>) -> Self {
        self.updates = Some(scheduler);
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Run a query end to end. Returns `AwaitingApproval` instead of a
    /// final answer when a mutating global operation needs sign-off.
    pub async fn run(&self, query: &str, subject: Option<String>, run_id: Option<String>) -> RunOutcome {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let state = PipelineState::new(query, subject);
        tracing::info!(run_id = %run_id, "pipeline run started");
        self.drive(&run_id, Stage::Start, state, None).await
    }

    /// Supply the external decision for a suspended run. The only way to
    /// clear a pending approval. Idempotent: once a run has finished, any
    /// further `resume` reports the recorded outcome without re-executing.
    pub async fn resume(&self, run_id: &str, decision: ApprovalDecision) -> RunOutcome {
        let checkpoint = match self.checkpoints.load(run_id) {
            Ok(Some(cp)) => cp,
            Ok(None) => return RunOutcome::Failed(PipelineError::UnknownRun(run_id.to_string())),
            Err(err) => return RunOutcome::Failed(err.into()),
        };

        if let Some(outcome) = checkpoint.outcome {
            tracing::info!(run_id = %run_id, "resume on a finished run; returning recorded outcome");
            return outcome_from_persisted(outcome);
        }
        if checkpoint.stage != Stage::AwaitingApproval {
            return RunOutcome::Failed(PipelineError::NotSuspended(run_id.to_string()));
        }

        let mut state = checkpoint.state;
        let Some(mut request) = state.pending_approval.take() else {
            return RunOutcome::Failed(PipelineError::Precondition(
                "suspended run has no pending approval request".to_string(),
            ));
        };

        match gate::decide(&mut request, decision) {
            Decided::Approved(token) => {
                tracing::info!(run_id = %run_id, "approval granted; resuming at retrieval");
                match transition(Stage::AwaitingApproval, StageOutcome::ApprovalGranted) {
                    Some(stage) => self.drive(run_id, stage, state, Some(token)).await,
                    None => RunOutcome::Failed(PipelineError::Precondition(
                        "invalid resume transition".to_string(),
                    )),
                }
            }
            Decided::Rejected => {
                let reason = request.description.clone();
                let cp = Checkpoint::new(run_id, Stage::Rejected, state)
                    .with_outcome(PersistedOutcome::Rejected {
                        reason: reason.clone(),
                    });
                if let Err(err) = self.checkpoints.save(&cp) {
                    tracing::warn!(run_id = %run_id, error = %err, "failed to persist rejection");
                }
                tracing::info!(run_id = %run_id, "run rejected");
                RunOutcome::Rejected(reason)
            }
            Decided::AlreadyDecided(status) => RunOutcome::Failed(PipelineError::Precondition(
                format!("pending approval was already {status:?}"),
            )),
        }
    }

    /// Current persisted snapshot for a run, if any.
    pub fn status(&self, run_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        self.checkpoints.load(run_id)
    }

    async fn drive(
        &self,
        run_id: &str,
        stage: Stage,
        state: PipelineState,
        approval: Option<ApprovalToken>,
    ) -> RunOutcome {
        let Some(timeout_secs) = self.config.timeouts.run_secs else {
            return self.advance(run_id, stage, state, approval).await;
        };

        // Keep a snapshot so a timed-out run still gets a terminal checkpoint.
        let entry_state = state.clone();
        let fut = self.advance(run_id, stage, state, approval);
        match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Dropping the run future cancels in-flight backend calls.
                let err = PipelineError::RunTimeout { timeout_secs };
                tracing::warn!(run_id = %run_id, timeout_secs, "run exceeded wall-clock budget");
                self.fail(run_id, entry_state, err)
            }
        }
    }

    async fn advance(
        &self,
        run_id: &str,
        mut stage: Stage,
        mut state: PipelineState,
        approval: Option<ApprovalToken>,
    ) -> RunOutcome {
        let mut answer: Option<String> = None;

        loop {
            for hook in &self.hooks {
                hook.before_stage(stage, &state);
            }

            let outcome = match stage {
                Stage::Start => Ok(StageOutcome::Started),
                Stage::Classify => classifier::classify(&mut state, &self.config.routing)
                    .map(|_| StageOutcome::Classified),
                Stage::Retrieve => self.retrieve_or_suspend(&mut state, approval.as_ref()).await,
                Stage::Prune => {
                    pruner::prune_state(&mut state, self.config.budgets.prune_tokens);
                    Ok(StageOutcome::Pruned)
                }
                Stage::Synthesize => {
                    match synthesizer::synthesize(&mut state, self.generator.as_ref()).await {
                        Ok(text) => {
                            answer = Some(text);
                            Ok(StageOutcome::Synthesized)
                        }
                        Err(err) => Err(err),
                    }
                }
                other => Err(PipelineError::Precondition(format!(
                    "driver entered unexpected stage '{other}'"
                ))),
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => return self.fail(run_id, state, err),
            };

            for hook in &self.hooks {
                hook.after_stage(stage, &state);
            }

            stage = match transition(stage, outcome) {
                Some(next) => next,
                None => {
                    return self.fail(
                        run_id,
                        state,
                        PipelineError::Precondition(format!(
                            "illegal transition from '{stage}' on {outcome:?}"
                        )),
                    );
                }
            };

            match stage {
                Stage::AwaitingApproval => {
                    let Some(request) = state.pending_approval.clone() else {
                        return self.fail(
                            run_id,
                            state,
                            PipelineError::Precondition(
                                "suspended without a pending approval request".to_string(),
                            ),
                        );
                    };
                    let cp = Checkpoint::new(run_id, Stage::AwaitingApproval, state);
                    if let Err(err) = self.checkpoints.save(&cp) {
                        // Without a checkpoint the run could never resume.
                        return self.fail(run_id, cp.state, err.into());
                    }
                    tracing::info!(
                        run_id = %run_id,
                        request_id = %request.id,
                        verb = %request.matched_verb,
                        "run suspended awaiting approval"
                    );
                    return RunOutcome::AwaitingApproval(request);
                }
                Stage::Done => {
                    let text = answer.unwrap_or_default();
                    let cp = Checkpoint::new(run_id, Stage::Done, state)
                        .with_outcome(PersistedOutcome::FinalAnswer { text: text.clone() });
                    if let Err(err) = self.checkpoints.save(&cp) {
                        tracing::warn!(run_id = %run_id, error = %err, "failed to persist final checkpoint");
                    }
                    self.enqueue_update(run_id, &text).await;
                    tracing::info!(run_id = %run_id, "run complete");
                    return RunOutcome::FinalAnswer(text);
                }
                _ => {}
            }
        }
    }

    /// The retrieval stage, with the approval gate in front of it. The
    /// gate only fires when the run targets the global store and the
    /// operation matches the mutating verb table; an approval token from
    /// `resume` carries the run straight through to the re-attempt.
    async fn retrieve_or_suspend(
        &self,
        state: &mut PipelineState,
        approval: Option<&ApprovalToken>,
    ) -> Result<StageOutcome, PipelineError> {
        let targets_global = state.intent.map(|i| i.needs_global()).unwrap_or(false);

        if targets_global && approval.is_none() {
            let message = state.last_user_message().unwrap_or_default().to_string();
            if let Some(verb) = gate::screen_mutation(&message, &self.config.gate.mutation_verbs) {
                state.pending_approval = Some(ApprovalRequest::new(message, verb));
                return Ok(StageOutcome::Suspended);
            }
        }

        retriever::retrieve(state, &self.backends, &self.config, approval)
            .await
            .map(|_| StageOutcome::Retrieved)
    }

    fn fail(&self, run_id: &str, state: PipelineState, err: PipelineError) -> RunOutcome {
        tracing::error!(run_id = %run_id, error = %err, "run failed");
        let cp = Checkpoint::new(run_id, Stage::Failed, state).with_outcome(
            PersistedOutcome::Failed {
                message: err.to_string(),
            },
        );
        if let Err(save_err) = self.checkpoints.save(&cp) {
            tracing::warn!(run_id = %run_id, error = %save_err, "failed to persist failure checkpoint");
        }
        RunOutcome::Failed(err)
    }

    async fn enqueue_update(&self, run_id: &str, answer: &str) {
        let Some(scheduler) = &self.updates else {
            return;
        };
        if answer.is_empty() {
            return;
        }
        if let Err(err) = scheduler
            .enqueue(KnowledgeUpdate::new(run_id, answer))
            .await
        {
            tracing::warn!(run_id = %run_id, error = %err, "failed to enqueue knowledge update");
        }
    }
}

fn outcome_from_persisted(outcome: PersistedOutcome) -> RunOutcome {
    match outcome {
        PersistedOutcome::FinalAnswer { text } => RunOutcome::FinalAnswer(text),
        PersistedOutcome::Rejected { reason } => RunOutcome::Rejected(reason),
        PersistedOutcome::Failed { message } => {
            RunOutcome::Failed(PipelineError::Other(anyhow::anyhow!(message)))
        }
    }
}
