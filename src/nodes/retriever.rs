//! Retrieval fan-out.
//!
//! Invokes the backends selected by the classified intent, each under its
//! own token budget and timeout. Backend failures are isolated: a run only
//! fails here when every requested backend failed. For HYBRID both calls
//! run concurrently; the merge order is fixed and documented — local
//! documents first, then global, each sub-sequence in backend return
//! order — so results are reproducible.

use crate::backend::{BackendSet, ContextBackend, GLOBAL, LOCAL};
use crate::config::WeaveConfig;
use crate::errors::{BackendError, PipelineError};
use crate::gate::{self, ApprovalToken};
use crate::state::{Diagnostic, Document, PipelineState};
use std::time::Duration;

/// Result of one backend call: accepted documents plus an optional
/// truncation diagnostic.
type Pull = (Vec<Document>, Option<Diagnostic>);

/// Fan out to the backends selected by `state.intent`, appending accepted
/// documents to `state.retrieved_documents`.
///
/// A mutating global operation must carry an approval token by the time it
/// reaches this function; the driver's gate is the only place tokens are
/// minted, which keeps this the sole guarded write path.
pub async fn retrieve(
    state: &mut PipelineState,
    backends: &BackendSet,
    config: &WeaveConfig,
    approval: Option<&ApprovalToken>,
) -> Result<(), PipelineError> {
    let intent = state.intent.ok_or_else(|| {
        PipelineError::Precondition("retrieval invoked before classification".to_string())
    })?;
    let query = state
        .last_user_message()
        .ok_or(PipelineError::EmptyInput)?
        .to_string();

    if intent.needs_global()
        && let Some(verb) = gate::screen_mutation(&query, &config.gate.mutation_verbs)
    {
        match approval {
            Some(token) => tracing::info!(
                request_id = %token.request_id(),
                verb = %verb,
                "executing approved mutating global operation"
            ),
            None => {
                return Err(PipelineError::Precondition(
                    "mutating global operation reached retrieval without approval".to_string(),
                ));
            }
        }
    }

    let limit = config.budgets.search_limit;
    let timeout = Duration::from_secs(config.timeouts.backend_secs);

    // Merge policy: local before global, each in its own return order.
    let (local_pull, global_pull) = match (intent.needs_local(), intent.needs_global()) {
        (true, true) => {
            // The only required parallelism in the pipeline.
            let (l, g) = tokio::join!(
                pull(
                    backends.local.as_ref(),
                    &query,
                    limit,
                    Some(config.budgets.local_tokens),
                    timeout,
                ),
                pull(
                    backends.global.as_ref(),
                    &query,
                    limit,
                    config.budgets.global_tokens,
                    timeout,
                ),
            );
            (Some(l), Some(g))
        }
        (true, false) => (
            Some(
                pull(
                    backends.local.as_ref(),
                    &query,
                    limit,
                    Some(config.budgets.local_tokens),
                    timeout,
                )
                .await,
            ),
            None,
        ),
        (false, true) => (
            None,
            Some(
                pull(
                    backends.global.as_ref(),
                    &query,
                    limit,
                    config.budgets.global_tokens,
                    timeout,
                )
                .await,
            ),
        ),
        (false, false) => unreachable!("every intent queries at least one backend"),
    };

    let mut requested = 0;
    let mut causes: Vec<BackendError> = Vec::new();

    for (backend_id, result) in [(LOCAL, local_pull), (GLOBAL, global_pull)] {
        let Some(result) = result else { continue };
        requested += 1;
        state.backends_invoked.insert(backend_id.to_string());

        match result {
            Ok((docs, diagnostic)) => {
                if let Some(d) = diagnostic {
                    state.diagnostics.push(d);
                }
                state.retrieved_documents.extend(docs);
            }
            Err(err) => {
                tracing::warn!(backend = backend_id, error = %err, "backend failed");
                causes.push(err);
            }
        }
    }

    if !causes.is_empty() && causes.len() == requested {
        return Err(PipelineError::Retrieval { causes });
    }

    // Partial failure: record and continue with what succeeded.
    for cause in causes {
        state.diagnostics.push(Diagnostic::BackendFailed {
            backend: cause.backend().to_string(),
            message: cause.to_string(),
        });
    }

    Ok(())
}

/// One budgeted, timeout-wrapped backend call.
async fn pull(
    backend: &dyn ContextBackend,
    query: &str,
    limit: usize,
    budget: Option<usize>,
    timeout: Duration,
) -> Result<Pull, BackendError> {
    let docs = match tokio::time::timeout(timeout, backend.search(query, limit)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(BackendError::Timeout {
                backend: backend.id().to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let Some(budget) = budget else {
        // Unbounded backend: accept everything, but keep it visible.
        let total: usize = docs.iter().map(|d| d.approximate_size).sum();
        tracing::debug!(backend = backend.id(), tokens = total, "unbudgeted retrieval");
        return Ok((docs, None));
    };

    let returned = docs.len();
    let mut accepted = Vec::new();
    let mut spent = 0;
    for doc in docs {
        if spent + doc.approximate_size > budget {
            break;
        }
        spent += doc.approximate_size;
        accepted.push(doc);
    }

    let dropped = returned - accepted.len();
    if dropped > 0 {
        tracing::warn!(
            backend = backend.id(),
            budget,
            accepted = accepted.len(),
            dropped,
            "budget exceeded - truncated"
        );
        let diagnostic = Diagnostic::BudgetExceeded {
            backend: backend.id().to_string(),
            budget,
            accepted: accepted.len(),
            dropped,
        };
        return Ok((accepted, Some(diagnostic)));
    }

    Ok((accepted, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Intent;
    use async_trait::async_trait;
    use std::sync::Arc;

    enum Script {
        Docs(Vec<&'static str>),
        Fail,
        Hang,
    }

    struct Scripted {
        id: String,
        script: Script,
    }

    #[async_trait]
    impl ContextBackend for Scripted {
        fn id(&self) -> &str {
            &self.id
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Document>, BackendError> {
            match &self.script {
                Script::Docs(texts) => Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(rank, text)| Document::new(&self.id, *text, rank))
                    .collect()),
                Script::Fail => Err(BackendError::Unavailable {
                    backend: self.id.clone(),
                    message: "connection refused".to_string(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn backends(local: Script, global: Script) -> BackendSet {
        BackendSet::new(
            Arc::new(Scripted {
                id: LOCAL.to_string(),
                script: local,
            }),
            Arc::new(Scripted {
                id: GLOBAL.to_string(),
                script: global,
            }),
        )
    }

    fn state_with(query: &str, intent: Intent) -> PipelineState {
        let mut state = PipelineState::new(query, None);
        state.set_intent(intent).unwrap();
        state
    }

    #[tokio::test]
    async fn local_intent_queries_local_only() {
        let set = backends(
            Script::Docs(vec!["local context"]),
            Script::Docs(vec!["must not appear"]),
        );
        let mut state = state_with("fix this file", Intent::Local);
        retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(state.retrieved_documents.len(), 1);
        assert_eq!(state.retrieved_documents[0].source, LOCAL);
        assert!(state.backends_invoked.contains(LOCAL));
        assert!(!state.backends_invoked.contains(GLOBAL));
    }

    #[tokio::test]
    async fn unknown_intent_routes_as_local() {
        let set = backends(Script::Docs(vec!["fallback"]), Script::Fail);
        let mut state = state_with("hello", Intent::Unknown);
        retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(state.backends_invoked.len(), 1);
        assert!(state.backends_invoked.contains(LOCAL));
    }

    #[tokio::test]
    async fn hybrid_merges_local_before_global() {
        let set = backends(
            Script::Docs(vec!["l1", "l2"]),
            Script::Docs(vec!["g1"]),
        );
        let mut state = state_with("pattern for this file", Intent::Hybrid);
        retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap();

        let sources: Vec<&str> = state
            .retrieved_documents
            .iter()
            .map(|d| d.source.as_str())
            .collect();
        assert_eq!(sources, vec![LOCAL, LOCAL, GLOBAL]);
        assert_eq!(state.retrieved_documents[0].text, "l1");
        assert_eq!(state.retrieved_documents[2].text, "g1");
    }

    #[tokio::test]
    async fn single_backend_failure_is_isolated() {
        let set = backends(Script::Docs(vec!["l1", "l2"]), Script::Fail);
        let mut state = state_with("pattern for this file", Intent::Hybrid);
        retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(state.retrieved_documents.len(), 2);
        assert!(state.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::BackendFailed { backend, .. } if backend == GLOBAL
        )));
        // Both backends were invoked, even though one failed.
        assert_eq!(state.backends_invoked.len(), 2);
    }

    #[tokio::test]
    async fn total_failure_preserves_all_causes() {
        let set = backends(Script::Fail, Script::Fail);
        let mut state = state_with("pattern for this file", Intent::Hybrid);
        let err = retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap_err();

        match err {
            PipelineError::Retrieval { causes } => {
                assert_eq!(causes.len(), 2);
                let names: Vec<&str> = causes.iter().map(|c| c.backend()).collect();
                assert!(names.contains(&LOCAL));
                assert!(names.contains(&GLOBAL));
            }
            other => panic!("expected Retrieval, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn budget_truncates_with_diagnostic() {
        let set = backends(
            Script::Docs(vec!["one two three", "four five six", "seven eight nine"]),
            Script::Docs(vec![]),
        );
        let mut config = WeaveConfig::default();
        config.budgets.local_tokens = 7; // two three-token docs fit, the third does not

        let mut state = state_with("fix this file", Intent::Local);
        retrieve(&mut state, &set, &config, None).await.unwrap();

        assert_eq!(state.retrieved_documents.len(), 2);
        assert!(state.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::BudgetExceeded { backend, accepted: 2, dropped: 1, .. } if backend == LOCAL
        )));
    }

    #[tokio::test]
    async fn backend_timeout_is_an_isolated_failure() {
        let set = backends(Script::Docs(vec!["quick"]), Script::Hang);
        let mut config = WeaveConfig::default();
        config.timeouts.backend_secs = 0; // anything not immediately ready times out

        let mut state = state_with("pattern for this file", Intent::Hybrid);
        retrieve(&mut state, &set, &config, None).await.unwrap();

        assert_eq!(state.retrieved_documents.len(), 1);
        assert!(state.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::BackendFailed { backend, message } if backend == GLOBAL && message.contains("timed out")
        )));
    }

    #[tokio::test]
    async fn mutating_global_call_requires_token() {
        let set = backends(Script::Docs(vec![]), Script::Docs(vec!["g"]));
        let mut state = state_with("MERGE the duplicate nodes", Intent::Global);
        let err = retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
        assert!(state.retrieved_documents.is_empty());
    }

    #[tokio::test]
    async fn retrieval_before_classification_fails_fast() {
        let set = backends(Script::Docs(vec![]), Script::Docs(vec![]));
        let mut state = PipelineState::new("anything", None);
        let err = retrieve(&mut state, &set, &WeaveConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
    }
}
