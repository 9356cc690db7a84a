//! Context pruning: de-duplication plus a budget ceiling.
//!
//! Pruning only selects or drops documents, it never edits them and never
//! reorders them to fit more. The budget unit is the cumulative
//! `approximate_size` of the retained documents.

use crate::state::{Document, PipelineState};
use std::collections::HashSet;

/// De-duplicate on exact `text` (first occurrence wins), then accept
/// documents greedily in order while the cumulative size stays within
/// `budget`. Empty input yields an empty output, never an error.
pub fn prune(documents: Vec<Document>, budget: usize) -> Vec<Document> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::new();
    let mut spent = 0;

    for doc in documents {
        if !seen.insert(doc.text.clone()) {
            continue;
        }
        if spent + doc.approximate_size > budget {
            break;
        }
        spent += doc.approximate_size;
        kept.push(doc);
    }

    kept
}

/// Run the pruner over the state's accumulated documents, replacing them
/// wholesale, and mark the state as pruned for the synthesizer.
pub fn prune_state(state: &mut PipelineState, budget: usize) {
    let before = state.retrieved_documents.len();
    let docs = std::mem::take(&mut state.retrieved_documents);
    state.retrieved_documents = prune(docs, budget);
    state.pruned = true;

    let kept = state.retrieved_documents.len();
    if kept < before {
        tracing::debug!(before, kept, budget, "context pruned");
    }
}
