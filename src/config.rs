//! Runtime configuration for the pipeline.
//!
//! Everything that is policy rather than algorithm lives here: the routing
//! marker tables, the mutation verb list, token budgets, and timeouts. All
//! values have compiled-in defaults so `weave.toml` is optional; a present
//! file overrides only the sections it names.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "weave.toml";

/// Marker tables driving intent classification. Matching is
/// case-insensitive substring containment, so multi-word markers are fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Cross-project/history/pattern indicators -> GLOBAL signal.
    pub global_markers: Vec<String>,
    /// This-file/this-function/fix-here indicators -> LOCAL signal.
    pub local_markers: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            global_markers: [
                "cross-project",
                "history",
                "pattern",
                "best practice",
                "other projects",
                "repository",
                "architecture",
                "company-wide",
            ]
            .map(String::from)
            .to_vec(),
            local_markers: ["this file", "this function", "fix", "bug", "current file"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Approval gate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Verbs that mark an operation as mutating. Case-insensitive
    /// substring match against the operation description.
    pub mutation_verbs: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mutation_verbs: ["create", "update", "delete", "merge"].map(String::from).to_vec(),
        }
    }
}

/// Token budgets. The unit everywhere is a document's `approximate_size`
/// (whitespace-delimited token count).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Cumulative token budget for documents accepted from one local
    /// backend call; documents past the budget are dropped.
    pub local_tokens: usize,
    /// Per-call cap for the global backend. `None` means unbounded, but
    /// oversized results are still logged.
    pub global_tokens: Option<usize>,
    /// Cumulative ceiling the pruner enforces on the merged set.
    pub prune_tokens: usize,
    /// `limit` passed to each backend `search()` call.
    pub search_limit: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            local_tokens: 4000,
            global_tokens: None,
            prune_tokens: 6000,
            search_limit: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-backend call timeout. Exceeding it fails that backend only.
    pub backend_secs: u64,
    /// Optional wall-clock budget for the whole run.
    pub run_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            backend_secs: 30,
            run_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding one JSON snapshot per run.
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".weave/runs"),
        }
    }
}

/// Knowledge write-back queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Whether completed runs enqueue a knowledge update at all.
    pub enabled: bool,
    /// Directory for the on-disk journal backing at-least-once delivery.
    pub journal_dir: PathBuf,
    /// Bounded timeout for applying one update to the global backend.
    pub apply_timeout_secs: u64,
    /// Queue capacity; enqueue fails loudly once full.
    pub capacity: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            journal_dir: PathBuf::from(".weave/updates"),
            apply_timeout_secs: 10,
            capacity: 32,
        }
    }
}

/// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub routing: RoutingConfig,
    pub gate: GateConfig,
    pub budgets: BudgetConfig,
    pub timeouts: TimeoutConfig,
    pub checkpoint: CheckpointConfig,
    pub updates: UpdateConfig,
}

impl WeaveConfig {
    /// Load from `weave.toml` under `dir`, falling back to defaults when
    /// the file does not exist. A present-but-invalid file is an error,
    /// not a silent fallback.
    pub fn load_or_default(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }
}
