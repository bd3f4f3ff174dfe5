//! Loading and merging of runr's on-disk configuration.
//!
//! This crate is deliberately thin: it parses the two config sources a
//! repo can carry and merges them into a [`RunrConfig`] the
//! supervisor and CLI pass around as a plain value. It does not perform
//! deep schema validation beyond what `serde` gives for free, and it does
//! not wire CLI flags (that's `runr-cli`'s job).
//!
//! Two sources, lowest to highest precedence:
//! 1. [`RunrConfig::default()`] -- the supervisor's built-in defaults.
//! 2. `.agent/runr.config.json` -- the per-repo config snapshot, JSON
//!    because it is also what gets copied verbatim into a run directory
//!    as `config.snapshot.json`.
//! 3. `.runr.toml` -- an optional workspace-relative override file, TOML
//!    because operators hand-edit it; rarely checked in, meant for local
//!    experiments (e.g. a tighter `time_budget_minutes` while iterating).
//!
//! # Example
//!
//! ```
//! use runr_config::{RunrConfig, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! assert!(config.budgets.max_ticks > 0);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use runr_types::CollisionPolicy;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Primary config source: the per-repo JSON snapshot. `config.snapshot.json`
/// is a copy of this file taken at run start.
pub const CONFIG_FILE: &str = ".agent/runr.config.json";

/// Optional workspace-relative override, TOML for easy hand-editing.
pub const OVERRIDE_FILE: &str = ".runr.toml";

/// Full runr configuration: scope lock defaults, per-phase worker
/// selection, budgets, and orchestration policy.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunrConfig {
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub phases: WorkerPhases,
    #[serde(default)]
    pub budgets: BudgetConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub auto_resume: bool,
    /// Backoff schedule for auto-resume, indexed by `auto_resume_count`.
    /// Held at the last entry once exhausted.
    #[serde(default = "default_auto_resume_delays_ms")]
    pub auto_resume_delays_ms: Vec<u64>,
    #[serde(default)]
    pub max_auto_resumes: u32,
    /// Skip PLAN and go straight to IMPLEMENT ("fast mode").
    #[serde(default)]
    pub fast: bool,
}

impl Default for RunrConfig {
    fn default() -> Self {
        Self {
            scope: ScopeConfig::default(),
            phases: WorkerPhases::default(),
            budgets: BudgetConfig::default(),
            orchestration: OrchestrationConfig::default(),
            auto_resume: false,
            auto_resume_delays_ms: default_auto_resume_delays_ms(),
            max_auto_resumes: default_max_auto_resumes(),
            fast: false,
        }
    }
}

fn default_auto_resume_delays_ms() -> Vec<u64> {
    vec![1_000, 5_000, 30_000, 60_000]
}

fn default_max_auto_resumes() -> u32 {
    3
}

impl RunrConfig {
    /// Merge `self` as the base and `other` as the override layer --
    /// `other`'s non-default scalars win, and its vectors/maps replace
    /// (not append to) the base's. Applied one layer deeper for explicit
    /// resume overrides, which win over both.
    pub fn merge(&self, other: &RunrConfig) -> RunrConfig {
        RunrConfig {
            scope: other.scope.clone(),
            phases: self.phases.merge(&other.phases),
            budgets: self.budgets.merge(&other.budgets),
            orchestration: other.orchestration.clone(),
            auto_resume: other.auto_resume || self.auto_resume,
            auto_resume_delays_ms: if other.auto_resume_delays_ms != default_auto_resume_delays_ms() {
                other.auto_resume_delays_ms.clone()
            } else {
                self.auto_resume_delays_ms.clone()
            },
            max_auto_resumes: if other.max_auto_resumes != default_max_auto_resumes() {
                other.max_auto_resumes
            } else {
                self.max_auto_resumes
            },
            fast: other.fast || self.fast,
        }
    }
}

/// Default scope lock applied to a run unless a task overrides it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub lockfile_patterns: Vec<String>,
    #[serde(default)]
    pub allow_deps: bool,
    /// Glob patterns that force tier1 verification regardless of risk
    /// level (`runr_policy::PolicyInputs::risk_triggers`).
    #[serde(default)]
    pub risk_triggers: Vec<String>,
}

/// Worker name per phase. The state machine references workers only by
/// name, so a fallback worker can be swapped in without touching phase
/// logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPhases {
    #[serde(default = "default_worker")]
    pub plan: String,
    #[serde(default = "default_worker")]
    pub implement: String,
    #[serde(default = "default_worker")]
    pub review: String,
    /// Fallback worker name tried on `worker_unavailable`. `None` means
    /// the phase simply stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Default for WorkerPhases {
    fn default() -> Self {
        Self {
            plan: default_worker(),
            implement: default_worker(),
            review: default_worker(),
            fallback: None,
        }
    }
}

impl WorkerPhases {
    fn merge(&self, other: &WorkerPhases) -> WorkerPhases {
        let default = default_worker();
        WorkerPhases {
            plan: if other.plan != default { other.plan.clone() } else { self.plan.clone() },
            implement: if other.implement != default {
                other.implement.clone()
            } else {
                self.implement.clone()
            },
            review: if other.review != default { other.review.clone() } else { self.review.clone() },
            fallback: other.fallback.clone().or_else(|| self.fallback.clone()),
        }
    }
}

fn default_worker() -> String {
    "codex".to_string()
}

/// Per-run timeouts and retry bounds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "time_budget_ms", default = "default_time_budget")]
    pub time_budget: Duration,
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_worker_call_ms", default = "default_max_worker_call")]
    pub max_worker_call: Duration,
    #[serde(default = "default_max_verify_retries")]
    pub max_verify_retries: u32,
    #[serde(default = "default_max_review_rounds")]
    pub max_review_rounds: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        rename = "max_verify_time_per_milestone_ms",
        default = "default_max_verify_time_per_milestone"
    )]
    pub max_verify_time_per_milestone: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            time_budget: default_time_budget(),
            max_ticks: default_max_ticks(),
            max_worker_call: default_max_worker_call(),
            max_verify_retries: default_max_verify_retries(),
            max_review_rounds: default_max_review_rounds(),
            max_verify_time_per_milestone: default_max_verify_time_per_milestone(),
        }
    }
}

impl BudgetConfig {
    fn merge(&self, other: &BudgetConfig) -> BudgetConfig {
        BudgetConfig {
            time_budget: if other.time_budget != default_time_budget() {
                other.time_budget
            } else {
                self.time_budget
            },
            max_ticks: if other.max_ticks != default_max_ticks() {
                other.max_ticks
            } else {
                self.max_ticks
            },
            max_worker_call: if other.max_worker_call != default_max_worker_call() {
                other.max_worker_call
            } else {
                self.max_worker_call
            },
            max_verify_retries: if other.max_verify_retries != default_max_verify_retries() {
                other.max_verify_retries
            } else {
                self.max_verify_retries
            },
            max_review_rounds: if other.max_review_rounds != default_max_review_rounds() {
                other.max_review_rounds
            } else {
                self.max_review_rounds
            },
            max_verify_time_per_milestone: if other.max_verify_time_per_milestone
                != default_max_verify_time_per_milestone()
            {
                other.max_verify_time_per_milestone
            } else {
                self.max_verify_time_per_milestone
            },
        }
    }
}

fn default_time_budget() -> Duration {
    Duration::from_secs(60 * 60)
}
fn default_max_ticks() -> u32 {
    200
}
fn default_max_worker_call() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_max_verify_retries() -> u32 {
    2
}
fn default_max_review_rounds() -> u32 {
    3
}
fn default_max_verify_time_per_milestone() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Multi-track orchestration defaults (`OrchestratorState.policy`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub ownership_required: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::Serialize,
            parallel: default_parallel(),
            ownership_required: false,
        }
    }
}

fn default_parallel() -> usize {
    1
}

fn config_json_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE)
}

fn override_toml_path(repo_root: &Path) -> PathBuf {
    repo_root.join(OVERRIDE_FILE)
}

/// Load `.agent/runr.config.json`, if present, layered over
/// [`RunrConfig::default()`], then layer `.runr.toml` over that if present.
/// A repo with neither file gets pure defaults.
pub fn load_config(repo_root: &Path) -> Result<RunrConfig> {
    let mut config = RunrConfig::default();

    let json_path = config_json_path(repo_root);
    if json_path.exists() {
        let content = std::fs::read_to_string(&json_path)
            .with_context(|| format!("failed to read config file: {}", json_path.display()))?;
        let from_json: RunrConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", json_path.display()))?;
        config = config.merge(&from_json);
    }

    let toml_path = override_toml_path(repo_root);
    if toml_path.exists() {
        let content = std::fs::read_to_string(&toml_path)
            .with_context(|| format!("failed to read override file: {}", toml_path.display()))?;
        let from_toml: RunrConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse override file: {}", toml_path.display()))?;
        config = config.merge(&from_toml);
    }

    Ok(config)
}

/// Serialize `config` as the bytes written to `config.snapshot.json` and
/// hashed into a run's [`runr_types::Fingerprint::config_hash`]. Stable
/// field order via `serde_json`'s struct-field order.
pub fn snapshot_bytes(config: &RunrConfig) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(config).context("failed to serialize config snapshot")
}
