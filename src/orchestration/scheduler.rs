//! Durable knowledge write-back queue.
//!
//! Completed runs can feed their synthesized answer back into the global
//! store. That update must not be fire-and-forget: each task is journaled
//! to disk before it is accepted, a worker applies it to the backend under
//! a bounded timeout, and the journal entry is deleted only after success.
//! Entries left behind by a crash are re-delivered through `recover()` —
//! at-least-once, never silently lost.
//!
//! The scheduler is an explicitly constructed instance injected into the
//! driver; there is no process-wide singleton.

use crate::backend::ContextBackend;
use crate::config::UpdateConfig;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One pending write-back: the synthesized summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeUpdate {
    pub id: Uuid,
    pub run_id: String,
    pub summary: String,
    pub queued_at: DateTime<Utc>,
}

impl KnowledgeUpdate {
    pub fn new(run_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            summary: summary.into(),
            queued_at: Utc::now(),
        }
    }
}

pub struct UpdateScheduler {
    tx: Mutex<Option<mpsc::Sender<KnowledgeUpdate>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    journal_dir: PathBuf,
}

impl UpdateScheduler {
    /// Spawn the worker applying updates to `global`.
    pub fn start(global: Arc<dyn ContextBackend>, config: &UpdateConfig) -> Result<Self> {
        fs::create_dir_all(&config.journal_dir).with_context(|| {
            format!("Failed to create journal dir {}", config.journal_dir.display())
        })?;

        let (tx, mut rx) = mpsc::channel::<KnowledgeUpdate>(config.capacity);
        let journal_dir = config.journal_dir.clone();
        let apply_timeout = Duration::from_secs(config.apply_timeout_secs);

        let worker_dir = journal_dir.clone();
        let worker = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let entry = worker_dir.join(format!("{}.json", update.id));
                match tokio::time::timeout(apply_timeout, global.ingest(&update.summary)).await {
                    Ok(Ok(())) => {
                        if let Err(err) = fs::remove_file(&entry) {
                            tracing::warn!(update = %update.id, error = %err, "applied update but failed to clear journal entry");
                        } else {
                            tracing::debug!(update = %update.id, run_id = %update.run_id, "knowledge update applied");
                        }
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(update = %update.id, error = %err, "knowledge update failed; journal entry retained");
                    }
                    Err(_) => {
                        tracing::warn!(update = %update.id, "knowledge update timed out; journal entry retained");
                    }
                }
            }
        });

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            journal_dir,
        })
    }

    /// Journal the update, then hand it to the worker. A full queue is an
    /// error for the caller, but the journal entry survives for `recover`.
    pub async fn enqueue(&self, update: KnowledgeUpdate) -> Result<()> {
        let entry = self.journal_dir.join(format!("{}.json", update.id));
        let json =
            serde_json::to_string_pretty(&update).context("Failed to serialize update")?;
        fs::write(&entry, json)
            .with_context(|| format!("Failed to journal update {}", entry.display()))?;

        let tx = self
            .tx
            .lock()
            .map_err(|_| anyhow!("scheduler lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("update scheduler has shut down"))?;

        tx.try_send(update)
            .map_err(|err| anyhow!("update queue rejected task: {err}"))?;
        Ok(())
    }

    /// Re-enqueue journal entries left behind by an earlier process.
    /// Returns how many were re-delivered.
    pub async fn recover(&self) -> Result<usize> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| anyhow!("scheduler lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("update scheduler has shut down"))?;

        let mut recovered = 0;
        for entry in fs::read_dir(&self.journal_dir).with_context(|| {
            format!("Failed to read journal dir {}", self.journal_dir.display())
        })? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read journal entry {}", path.display()))?;
            let update: KnowledgeUpdate = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt journal entry {}", path.display()))?;
            tx.send(update)
                .await
                .map_err(|_| anyhow!("update worker is gone"))?;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "re-delivering journaled knowledge updates");
        }
        Ok(recovered)
    }

    /// Close the queue and wait for the worker to drain in-flight work.
    pub async fn shutdown(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| anyhow!("scheduler lock poisoned"))?
            .take();
        drop(tx);

        let worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("scheduler lock poisoned"))?
            .take();
        if let Some(handle) = worker {
            handle.await.context("update worker panicked")?;
        }
        Ok(())
    }

    /// Ids still journaled (not yet successfully applied).
    pub fn pending(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.journal_dir).with_context(|| {
            format!("Failed to read journal dir {}", self.journal_dir.display())
        })? {
            let path = entry?.path();
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(id) = stem.parse()
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
