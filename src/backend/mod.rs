//! Context backends: the pluggable retrieval providers behind the fan-out.
//!
//! The pipeline only ever talks to `dyn ContextBackend`; the concrete
//! local index and global knowledge store live outside this crate. The
//! in-memory implementation here backs the CLI demo and the test suite.

use crate::errors::BackendError;
use crate::state::Document;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Identifier of the fast local context source.
pub const LOCAL: &str = "local";
/// Identifier of the slow global knowledge store.
pub const GLOBAL: &str = "global";

/// A context-retrieval provider. Implementations must be safe to call
/// concurrently from multiple pipeline runs.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Stable backend identifier, e.g. "local" or "global".
    fn id(&self) -> &str;

    /// Retrieve up to `limit` documents for `query`, most relevant first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>, BackendError>;

    /// Append a piece of knowledge to the store. Only the knowledge
    /// write-back queue calls this; backends without a writable store keep
    /// the default refusal.
    async fn ingest(&self, _text: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            backend: self.id().to_string(),
            operation: "ingest".to_string(),
        })
    }
}

/// The two providers a driver fans out to.
#[derive(Clone)]
pub struct BackendSet {
    pub local: Arc<dyn ContextBackend>,
    pub global: Arc<dyn ContextBackend>,
}

impl BackendSet {
    pub fn new(local: Arc<dyn ContextBackend>, global: Arc<dyn ContextBackend>) -> Self {
        Self { local, global }
    }
}

/// In-memory keyword backend: scores each corpus entry by how many query
/// tokens it contains, returns the best matches in score order with
/// insertion order as the tie-break.
pub struct MemoryBackend {
    id: String,
    corpus: RwLock<Vec<String>>,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>, corpus: Vec<String>) -> Self {
        Self {
            id: id.into(),
            corpus: RwLock::new(corpus),
        }
    }

    /// Build a corpus from newline-delimited text, skipping blank lines.
    pub fn from_lines(id: impl Into<String>, text: &str) -> Self {
        let corpus = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Self::new(id, corpus)
    }

    pub fn len(&self) -> usize {
        self.corpus.read().expect("corpus lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContextBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>, BackendError> {
        let needle = query.to_lowercase();
        let terms: Vec<&str> = needle.split_whitespace().collect();

        let corpus = self.corpus.read().map_err(|_| BackendError::Unavailable {
            backend: self.id.clone(),
            message: "corpus lock poisoned".to_string(),
        })?;
        let mut scored: Vec<(usize, &String)> = corpus
            .iter()
            .filter_map(|entry| {
                let haystack = entry.to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(**t)).count();
                (score > 0).then_some((score, entry))
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(rank, (_, text))| Document::new(&self.id, text.clone(), rank))
            .collect())
    }

    async fn ingest(&self, text: &str) -> Result<(), BackendError> {
        self.corpus
            .write()
            .map_err(|_| BackendError::Unavailable {
                backend: self.id.clone(),
                message: "corpus lock poisoned".to_string(),
            })?
            .push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(
            LOCAL,
            vec![
                "auth handler validates the session token".to_string(),
                "database pool configuration".to_string(),
                "auth token refresh logic with session cache".to_string(),
            ],
        )
    }

    #[tokio::test]
    async fn search_scores_by_matching_terms() {
        let b = backend();
        let docs = b.search("auth token session", 10).await.unwrap();
        assert_eq!(docs.len(), 2);
        // Both auth entries match all three terms; insertion order breaks the tie.
        assert!(docs[0].text.starts_with("auth handler"));
        assert_eq!(docs[0].relevance_rank, 0);
        assert_eq!(docs[1].relevance_rank, 1);
        assert!(docs.iter().all(|d| d.source == LOCAL));
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let b = backend();
        let docs = b.search("auth", 1).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let b = backend();
        let docs = b.search("zzz qqq", 10).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn ingest_makes_entry_searchable() {
        let b = backend();
        b.ingest("new frobnicator knowledge").await.unwrap();
        let docs = b.search("frobnicator", 10).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn from_lines_skips_blanks() {
        let b = MemoryBackend::from_lines(GLOBAL, "one\n\n  \ntwo\n");
        assert_eq!(b.len(), 2);
    }
}
