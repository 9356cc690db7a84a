//! Durable checkpoints keyed by run id.
//!
//! A suspended run detaches completely: everything needed to resume later,
//! possibly in a different process, is a single JSON file per run under the
//! checkpoint directory. Writes go through a temp file plus rename so a
//! crash never leaves a half-written snapshot behind.

use super::{PipelineState, Stage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A terminal result recorded alongside the final checkpoint so that
/// re-resuming an already-decided run returns the prior outcome instead of
/// re-executing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistedOutcome {
    FinalAnswer { text: String },
    Rejected { reason: String },
    Failed { message: String },
}

/// Snapshot of a run: current FSM stage plus the full pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub stage: Stage,
    pub state: PipelineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PersistedOutcome>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, stage: Stage, state: PipelineState) -> Self {
        Self {
            run_id: run_id.into(),
            stage,
            state,
            outcome: None,
            saved_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: PersistedOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// File-backed checkpoint store: one `<run_id>.json` per run.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(run_id)))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", self.dir.display()))?;

        let path = self.path_for(&checkpoint.run_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)
            .context("Failed to serialize checkpoint")?;
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write checkpoint {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit checkpoint {}", path.display()))?;

        tracing::debug!(run_id = %checkpoint.run_id, stage = %checkpoint.stage, "checkpoint saved");
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let checkpoint = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn remove(&self, run_id: &str) -> Result<()> {
        let path = self.path_for(run_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove checkpoint {}", path.display()))?;
        }
        Ok(())
    }

    /// Run ids with a stored checkpoint, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read checkpoint dir {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Some(id) = decode_id(stem)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Filename-safe encoding of a run id. Injective: distinct ids never map
/// to the same file. Alphanumerics and '-' pass through; every other byte
/// (including '_', the escape character) becomes `_xx` hex.
fn encode_id(run_id: &str) -> String {
    let mut safe = String::with_capacity(run_id.len());
    for b in run_id.bytes() {
        match b {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' => safe.push(b as char),
            other => {
                safe.push('_');
                safe.push_str(&format!("{other:02x}"));
            }
        }
    }
    safe
}

/// Inverse of `encode_id`. `None` for stems that are not valid encodings,
/// such as stray files in the store directory.
fn decode_id(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut input = stem.bytes();
    while let Some(b) = input.next() {
        if b == b'_' {
            let hex = [input.next()?, input.next()?];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApprovalRequest, Document, Intent};
    use tempfile::tempdir;

    fn sample_state() -> PipelineState {
        let mut state = PipelineState::new("MERGE the auth patterns", Some("auth.py".into()));
        state.set_intent(Intent::Global).unwrap();
        state
            .retrieved_documents
            .push(Document::new("global", "pattern from project X", 0));
        state.pending_approval = Some(ApprovalRequest::new("MERGE the auth patterns", "merge"));
        state
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let cp = Checkpoint::new("run-1", Stage::AwaitingApproval, sample_state());
        store.save(&cp).unwrap();

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.stage, Stage::AwaitingApproval);
        assert_eq!(loaded.state.intent, Some(Intent::Global));
        assert_eq!(loaded.state.retrieved_documents.len(), 1);
        assert!(loaded.state.pending_approval.unwrap().is_pending());
        assert!(loaded.outcome.is_none());
    }

    #[test]
    fn load_missing_run_returns_none() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store
            .save(&Checkpoint::new("run-1", Stage::AwaitingApproval, sample_state()))
            .unwrap();
        let done = Checkpoint::new("run-1", Stage::Done, sample_state()).with_outcome(
            PersistedOutcome::FinalAnswer {
                text: "answer".to_string(),
            },
        );
        store.save(&done).unwrap();

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Done);
        assert_eq!(
            loaded.outcome,
            Some(PersistedOutcome::FinalAnswer {
                text: "answer".to_string()
            })
        );
    }

    #[test]
    fn survives_process_restart() {
        let dir = tempdir().unwrap();
        {
            let store = CheckpointStore::new(dir.path());
            store
                .save(&Checkpoint::new("run-9", Stage::AwaitingApproval, sample_state()))
                .unwrap();
        }
        {
            let store = CheckpointStore::new(dir.path());
            let loaded = store.load("run-9").unwrap().unwrap();
            assert_eq!(loaded.stage, Stage::AwaitingApproval);
        }
    }

    #[test]
    fn list_and_remove() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save(&Checkpoint::new("b-run", Stage::Done, sample_state()))
            .unwrap();
        store
            .save(&Checkpoint::new("a-run", Stage::Done, sample_state()))
            .unwrap();

        assert_eq!(store.list().unwrap(), vec!["a-run", "b-run"]);
        store.remove("a-run").unwrap();
        assert_eq!(store.list().unwrap(), vec!["b-run"]);
        // Removing twice is fine.
        store.remove("a-run").unwrap();
    }

    #[test]
    fn hostile_run_ids_stay_inside_the_store_dir() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let cp = Checkpoint::new("../escape", Stage::Done, sample_state());
        store.save(&cp).unwrap();
        assert!(store.load("../escape").unwrap().is_some());
        // The snapshot landed inside the store dir, not a level up.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(store.list().unwrap(), vec!["../escape"]);
    }

    #[test]
    fn similar_run_ids_get_distinct_files() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store
            .save(&Checkpoint::new("a/b", Stage::Done, sample_state()))
            .unwrap();
        store
            .save(&Checkpoint::new("a_b", Stage::AwaitingApproval, sample_state()))
            .unwrap();

        assert_eq!(store.load("a/b").unwrap().unwrap().stage, Stage::Done);
        assert_eq!(
            store.load("a_b").unwrap().unwrap().stage,
            Stage::AwaitingApproval
        );
        assert_eq!(store.list().unwrap(), vec!["a/b", "a_b"]);
    }

    #[test]
    fn encode_decode_round_trips() {
        for id in ["plain-id", "a_b", "a/b", "run 7", "../escape", "한글-run"] {
            assert_eq!(decode_id(&encode_id(id)).as_deref(), Some(id));
        }
        // A stray file whose name is not a valid encoding is skipped.
        assert!(decode_id("bad_zz").is_none());
    }
}
