//! Final answer synthesis.
//!
//! Builds a single context blob from the pruned documents plus the
//! conversation, makes exactly one call to the external generation
//! capability, and appends exactly one assistant message. Retry policy, if
//! any, belongs to the generator's own client, not here.

use crate::errors::PipelineError;
use crate::state::PipelineState;
use async_trait::async_trait;

/// The external language-generation capability. One call per run.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Synthesize the final answer for the run.
///
/// Requires the intent to be classified and the pruner to have run; both
/// are checked via state flags, not re-derived, and violations fail fast.
pub async fn synthesize(
    state: &mut PipelineState,
    generator: &dyn Generator,
) -> Result<String, PipelineError> {
    let intent = state.intent.ok_or_else(|| {
        PipelineError::Precondition("synthesizer invoked before classification".to_string())
    })?;
    if !state.pruned {
        return Err(PipelineError::Precondition(
            "synthesizer invoked before pruning".to_string(),
        ));
    }

    let prompt = build_prompt(state, intent.as_str());
    tracing::debug!(
        documents = state.retrieved_documents.len(),
        prompt_chars = prompt.len(),
        "generating final answer"
    );

    let answer = generator
        .generate(&prompt)
        .await
        .map_err(PipelineError::Synthesis)?;

    state.push_assistant(answer.clone());
    Ok(answer)
}

/// Assemble the generation prompt: conversation turns followed by the
/// retrieved context in its pruned order.
fn build_prompt(state: &PipelineState, intent: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Conversation\n");
    for message in &state.conversation {
        let role = match message.role {
            crate::state::Role::User => "user",
            crate::state::Role::Assistant => "assistant",
        };
        prompt.push_str(&format!("{role}: {}\n", message.text));
    }

    prompt.push_str(&format!("\n## Retrieved context (intent: {intent})\n"));
    if state.retrieved_documents.is_empty() {
        prompt.push_str("(no documents retrieved)\n");
    }
    for doc in &state.retrieved_documents {
        prompt.push_str(&format!("- [{}] {}\n", doc.source, doc.text));
    }

    prompt.push_str("\nAnswer the user's question using only the context above.\n");
    prompt
}

/// Deterministic generator used by the CLI demo: folds the retrieved
/// context into a templated answer instead of calling a model.
pub struct TemplateGenerator;

#[async_trait]
impl Generator for TemplateGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(format!(
            "Based on the retrieved context:\n\n{prompt}\n\nProceed with the change, keeping to the patterns shown above."
        ))
    }
}
