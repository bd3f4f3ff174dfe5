//! # Types
//!
//! Core domain types shared across the `runr` control plane: the per-run
//! state machine's [`RunState`], the append-only [`Event`] log entry, the
//! multi-track [`OrchestratorState`], and the wire contracts ([`ResumePlan`],
//! [`WaitResult`]) exchanged with callers.
//!
//! ## Serialization
//!
//! Every persisted type implements `Serialize`/`Deserialize`. Durations are
//! serialized as milliseconds for cross-platform, cross-language stability;
//! the [`deserialize_duration`] helper additionally accepts human-readable
//! strings (`"5m"`, `"30s"`) on the read side, matching what operators type
//! into config files.
//!
//! ## Stability
//!
//! These types are the on-disk format. Changing a field's meaning (not just
//! adding one) requires bumping the relevant `schema_version` constant.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DurationMilliSeconds, serde_as};

/// Deserialize a Duration from either a string (human-readable) or u64 (milliseconds).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => ::humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {}", e))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a Duration as milliseconds (u64) so it roundtrips with `deserialize_duration`.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A run's stable identifier: a 14-digit UTC timestamp `YYYYMMDDhhmmss`
/// followed by a short random suffix to disambiguate same-second starts.
/// Lexicographic order equals start-time order, which the orchestrator's
/// deadlock tiebreak and the checkpoint scan on resume both depend on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(timestamp: DateTime<Utc>, suffix: &str) -> Self {
        Self(format!("{}-{}", timestamp.format("%Y%m%d%H%M%S"), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An orchestration's stable identifier, same shape as [`RunId`] but a
/// distinct type so the two handle spaces can never be confused at a call
/// site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestratorId(pub String);

impl std::fmt::Display for OrchestratorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phase of the per-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Plan,
    Implement,
    Verify,
    Review,
    Checkpoint,
    Finalize,
    Stopped,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Stopped)
    }
}

/// Risk level assigned to a milestone, driving [`VerificationPolicy`] tier
/// selection (the policy logic itself lives in `runr-policy`; this is just
/// the shared enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One verification tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier0,
    Tier1,
    Tier2,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier0 => "tier0",
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
        }
    }
}

/// One milestone in a run's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_expected: Option<Vec<String>>,
}

/// Glob-based file scope attached to a run or a track step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeLock {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub lockfile_patterns: Vec<String>,
    #[serde(default)]
    pub allow_deps: bool,
}

/// Grouped families for [`StopReason`], used by receipts to explain "why
/// did this stop" at a glance before drilling into the specific reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReasonFamily {
    Complete,
    Budget,
    Guard,
    Verification,
    Worker,
    Review,
    Orchestrator,
}

/// All reasons a run (or track) can stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    MaxTicksReached,
    TimeBudgetExceeded,
    StalledTimeout,
    GuardViolation,
    PlanScopeViolation,
    OwnershipViolation,
    ParallelFileCollision,
    VerificationFailedMaxRetries,
    PlanParseFailed,
    ImplementParseFailed,
    ReviewParseFailed,
    WorkerUnavailable,
    ReviewLoopDetected,
    OrchestratorTrackStopped,
    UserStop,
}

impl StopReason {
    pub fn family(self) -> StopReasonFamily {
        use StopReason::*;
        match self {
            Complete => StopReasonFamily::Complete,
            MaxTicksReached | TimeBudgetExceeded | StalledTimeout => StopReasonFamily::Budget,
            GuardViolation | PlanScopeViolation | OwnershipViolation | ParallelFileCollision => {
                StopReasonFamily::Guard
            }
            VerificationFailedMaxRetries => StopReasonFamily::Verification,
            PlanParseFailed | ImplementParseFailed | ReviewParseFailed | WorkerUnavailable
            | UserStop => StopReasonFamily::Worker,
            ReviewLoopDetected => StopReasonFamily::Review,
            OrchestratorTrackStopped => StopReasonFamily::Orchestrator,
        }
    }

    /// Whether an auto-resume is eligible to retry this stop.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StopReason::MaxTicksReached | StopReason::TimeBudgetExceeded | StopReason::StalledTimeout
        )
    }

    /// `runr resume <run_id>`-shaped suggestion for the stop receipt.
    pub fn suggested_command(self, run_id: &RunId) -> String {
        match self {
            StopReason::GuardViolation | StopReason::PlanScopeViolation => {
                "# Review .agent/runr.config.json scope settings".to_string()
            }
            StopReason::Complete => String::new(),
            _ => format!("runr resume {run_id}"),
        }
    }
}

/// Verdict returned by a Review worker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Revise,
}

/// Verification evidence recorded on `RunState` after the most recent
/// VERIFY phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEvidence {
    pub tiers_run: Vec<Tier>,
    pub reasons: Vec<String>,
    pub passed: bool,
    pub log_paths: Vec<PathBuf>,
}

/// Per-run snapshot. This is `state.json` — a rebuilt projection of
/// the event log, never itself the source of truth.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub repo_path: PathBuf,
    pub phase: Phase,
    pub milestone_index: usize,
    pub milestones: Vec<Milestone>,
    pub phase_attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_phase: Option<Phase>,
    pub scope_lock: ScopeLock,
    pub owned_paths: Vec<String>,
    pub current_branch: String,
    pub planned_run_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_evidence: Option<VerificationEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub auto_resume_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Construct the initial state for a freshly-started run.
    pub fn new(run_id: RunId, repo_path: PathBuf, milestones: Vec<Milestone>, branch: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            repo_path,
            phase: Phase::Init,
            milestone_index: 0,
            milestones,
            phase_attempt: 0,
            last_successful_phase: None,
            scope_lock: ScopeLock::default(),
            owned_paths: Vec::new(),
            current_branch: branch.clone(),
            planned_run_branch: branch,
            checkpoint_commit_sha: None,
            last_verification_evidence: None,
            stop_reason: None,
            auto_resume_count: 0,
            updated_at: now,
        }
    }

    /// Invariant: `milestone_index <= len(milestones)`.
    pub fn milestone_index_in_bounds(&self) -> bool {
        self.milestone_index <= self.milestones.len()
    }

    /// Invariant: `phase == Stopped` iff `stop_reason` is set.
    pub fn stop_invariant_holds(&self) -> bool {
        (self.phase == Phase::Stopped) == self.stop_reason.is_some()
    }

    pub fn current_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.milestone_index)
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }
}

/// One append-only timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: EventSource,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Who emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Cli,
    Supervisor,
    Worker,
    Orchestrator,
}

/// Non-exhaustive enumeration of contract-bearing event types. Kept
/// as an open string newtype rather than a closed enum: new event kinds are
/// additive and must not require a schema bump to emit, but the well-known
/// ones get named constructors below for call-site clarity and typo safety.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub String);

macro_rules! event_types {
    ($($konst:ident => $name:expr),* $(,)?) => {
        impl EventType {
            $(pub fn $konst() -> Self { Self($name.to_string()) })*
        }
    };
}

event_types! {
    run_started => "run_started",
    preflight => "preflight",
    phase_start => "phase_start",
    plan_generated => "plan_generated",
    milestone_complete => "milestone_complete",
    implement_complete => "implement_complete",
    verification => "verification",
    tier_passed => "tier_passed",
    tier_failed => "tier_failed",
    verify_complete => "verify_complete",
    review_complete => "review_complete",
    parse_failed => "parse_failed",
    worker_fallback => "worker_fallback",
    stalled_timeout => "stalled_timeout",
    late_worker_result_ignored => "late_worker_result_ignored",
    guard_violation => "guard_violation",
    worktree_created => "worktree_created",
    worktree_recreated => "worktree_recreated",
    worktree_branch_mismatch => "worktree_branch_mismatch",
    node_modules_symlinked => "node_modules_symlinked",
    fresh_target => "fresh_target",
    resume => "resume",
    run_resumed => "run_resumed",
    auto_stash_created => "auto_stash_created",
    ignored_changes => "ignored_changes",
    stop => "stop",
    run_complete => "run_complete",
    worker_stats => "worker_stats",
    checkpoint => "checkpoint",
    orchestrator_launch => "orchestrator_launch",
    orchestrator_wait => "orchestrator_wait",
    orchestrator_blocked => "orchestrator_blocked",
    orchestrator_done => "orchestrator_done",
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the repository relevant to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoContext {
    pub git_root: PathBuf,
    pub current_branch: String,
    pub run_branch: String,
    pub default_branch: String,
    pub changed_files: Vec<String>,
}

/// A reservation of glob patterns held by a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipClaim {
    pub track_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub owns_raw: Vec<String>,
    pub owns_normalized: Vec<String>,
}

/// Collision policy for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    Serialize,
    Fail,
    Force,
}

/// Immutable policy for one orchestration.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorPolicy {
    pub collision_policy: CollisionPolicy,
    pub parallel: usize,
    #[serde(default)]
    pub fast: bool,
    #[serde(default)]
    pub auto_resume: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "time_budget_ms")]
    pub time_budget: Duration,
    pub max_ticks: u32,
    #[serde(default)]
    pub ownership_required: bool,
}

/// Status of an orchestration or a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Complete,
    Stopped,
    Failed,
}

/// One step within a track: a task to hand to a run, plus its result once
/// launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub task_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub owns_raw: Vec<String>,
    #[serde(default)]
    pub owns_normalized: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

/// Terminal outcome of one launched step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub elapsed_ms: u64,
}

/// An ordered sequence of steps scheduled by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub current_step: usize,
    pub status: RunStatus,
}

impl Track {
    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Complete | RunStatus::Stopped | RunStatus::Failed
        )
    }
}

/// Full orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub orchestrator_id: OrchestratorId,
    pub tracks: Vec<Track>,
    pub active_runs: BTreeMap<String, RunId>,
    pub file_claims: BTreeMap<String, OwnershipClaim>,
    pub policy: OrchestratorPolicy,
    pub status: RunStatus,
}

/// Environment fingerprint captured at run start and re-captured on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub runtime_version: String,
    pub os: String,
    pub arch: String,
    pub key_tool_versions: BTreeMap<String, String>,
    pub config_hash: String,
    pub lockfile_hashes: BTreeMap<String, String>,
}

/// One field-level mismatch between two fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintMismatch {
    pub field: String,
    pub original: String,
    pub current: String,
}

impl Fingerprint {
    /// Diff two fingerprints field-by-field.
    pub fn diff(&self, other: &Fingerprint) -> Vec<FingerprintMismatch> {
        let mut mismatches = Vec::new();
        let mut push = |field: &str, a: &str, b: &str| {
            if a != b {
                mismatches.push(FingerprintMismatch {
                    field: field.to_string(),
                    original: a.to_string(),
                    current: b.to_string(),
                });
            }
        };
        push("runtime_version", &self.runtime_version, &other.runtime_version);
        push("os", &self.os, &other.os);
        push("arch", &self.arch, &other.arch);
        push("config_hash", &self.config_hash, &other.config_hash);
        for (tool, version) in &self.key_tool_versions {
            let other_version = other.key_tool_versions.get(tool).cloned().unwrap_or_default();
            push(&format!("key_tool_versions.{tool}"), version, &other_version);
        }
        for (lockfile, hash) in &self.lockfile_hashes {
            let other_hash = other.lockfile_hashes.get(lockfile).cloned().unwrap_or_default();
            push(&format!("lockfile_hashes.{lockfile}"), hash, &other_hash);
        }
        mismatches
    }
}

/// A Worker call's phase-specific capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCapability {
    PlanTask,
    Implement,
    Review,
}

/// Structured Plan result from a `PlanTask` worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub milestones: Vec<Milestone>,
}

/// Structured Implementation result from an `Implement` worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub changed_files: Vec<String>,
    pub message: String,
}

/// Structured Review result from a `Review` worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub verdict: ReviewVerdict,
    pub notes: String,
}

/// The three possible typed Worker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailure {
    ParseFailed,
    WorkerUnavailable,
    Timeout,
}

/// Outcome of a single Verifier tier run. The `Verifier` trait itself
/// lives in `runr-supervisor`; this result type lives here because both the
/// store's evidence field and the policy's reasons reference its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierResult {
    pub ok: bool,
    pub log_path: PathBuf,
    pub duration_ms: u64,
    pub passed: u32,
    pub failed: u32,
    /// Set by the verifier when a failure is known to be non-recoverable
    /// (distinct from the default "recoverable unless marked otherwise").
    #[serde(default)]
    pub unrecoverable: bool,
}

pub const RESUME_PLAN_SCHEMA_VERSION: u32 = 1;
pub const WAIT_RESULT_SCHEMA_VERSION: u32 = 1;

/// Source of the discovered checkpoint during resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    RunSpecific,
    Legacy,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    pub milestone_index: i64,
    pub source: CheckpointSource,
}

impl Default for CheckpointSource {
    fn default() -> Self {
        CheckpointSource::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeTarget {
    pub from_milestone_index: usize,
    pub phase: Phase,
    pub remaining_milestones: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoState {
    pub working_tree_clean: bool,
    pub dirty_paths_sample: Vec<String>,
    pub dirty_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffstat: Option<String>,
    #[serde(default)]
    pub lockfiles_changed: bool,
    #[serde(default)]
    pub ignored_noise_count: usize,
    #[serde(default)]
    pub ignored_noise_sample: Vec<String>,
}

/// `ResumePlan` wire contract. `schema_version` pinned at
/// [`RESUME_PLAN_SCHEMA_VERSION`]; bumping the meaning of any field below
/// requires a `migrate_v1_to_v2`-shaped function rather than changing the
/// existing field's semantics in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePlan {
    pub schema_version: u32,
    pub run_id: RunId,
    pub repo_path: PathBuf,
    pub effective_repo_path: PathBuf,
    pub checkpoint: CheckpointInfo,
    pub resume: ResumeTarget,
    pub repo_state: RepoState,
    pub delta: Delta,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// `WaitResult` wire contract for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitResult {
    pub schema_version: u32,
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub repo_root: PathBuf,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub phase: Phase,
    pub progress_milestone: usize,
    pub progress_of: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_command: Option<String>,
    pub elapsed_ms: u64,
    pub ts: DateTime<Utc>,
}

/// `WaitResult` wire contract for an orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorWaitResult {
    pub schema_version: u32,
    pub orchestrator_id: OrchestratorId,
    pub status: RunStatus,
    pub tracks_completed: usize,
    pub tracks_total: usize,
    pub steps_completed: usize,
    pub steps_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason_family: Option<StopReasonFamily>,
    pub elapsed_ms: u64,
}

/// Checkpoint commit subject regex source, authoritative for this
/// workspace. Exposed as a format string (not a pre-built `Regex`, to keep
/// this leaf crate free of a regex dependency) -- `runr-git` builds the
/// actual `Regex` from it.
pub const CHECKPOINT_SUBJECT_FMT: &str = r"^chore\(runr\): checkpoint {run_id} milestone (\d+)$";
pub const LEGACY_CHECKPOINT_SUBJECT: &str = r"^chore\(agent\): checkpoint milestone (\d+)$";

/// Exit codes shared by `runr-cli` across subcommands.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const STOP_OR_ERROR: i32 = 1;
    pub const WAIT_TIMEOUT: i32 = 124;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_sorts_lexicographically_by_start_time() {
        let a = RunId::new(Utc::now(), "aaa");
        std::thread::sleep(Duration::from_millis(2));
        let b = RunId::new(Utc::now() + chrono::Duration::seconds(1), "bbb");
        assert!(a < b);
    }

    #[test]
    fn stop_reason_family_grouping() {
        assert_eq!(StopReason::StalledTimeout.family(), StopReasonFamily::Budget);
        assert_eq!(StopReason::GuardViolation.family(), StopReasonFamily::Guard);
        assert_eq!(
            StopReason::VerificationFailedMaxRetries.family(),
            StopReasonFamily::Verification
        );
        assert_eq!(StopReason::ReviewLoopDetected.family(), StopReasonFamily::Review);
    }

    #[test]
    fn only_budget_stops_are_transient() {
        assert!(StopReason::StalledTimeout.is_transient());
        assert!(!StopReason::GuardViolation.is_transient());
        assert!(!StopReason::Complete.is_transient());
    }

    #[test]
    fn run_state_invariants_hold_for_fresh_state() {
        let state = RunState::new(
            RunId("20260101000000-abcd".into()),
            PathBuf::from("/repo"),
            vec![Milestone {
                name: "m1".into(),
                risk_level: RiskLevel::Low,
                files_expected: None,
            }],
            "runr/run-1".into(),
        );
        assert!(state.milestone_index_in_bounds());
        assert!(state.stop_invariant_holds());
        assert!(!state.is_stopped());
    }

    #[test]
    fn duration_roundtrips_through_millis() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(
                serialize_with = "serialize_duration",
                deserialize_with = "deserialize_duration"
            )]
            d: Duration,
        }
        let w = Wrapper { d: Duration::from_millis(1500) };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"d":1500}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d, Duration::from_millis(1500));
    }

    #[test]
    fn duration_accepts_human_readable_string_on_read() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "deserialize_duration")]
            d: Duration,
        }
        let w: Wrapper = serde_json::from_str(r#"{"d":"5m"}"#).unwrap();
        assert_eq!(w.d, Duration::from_secs(300));
    }

    #[test]
    fn fingerprint_diff_reports_only_mismatches() {
        let mut a = Fingerprint {
            runtime_version: "1.92".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            key_tool_versions: BTreeMap::new(),
            config_hash: "deadbeef".into(),
            lockfile_hashes: BTreeMap::new(),
        };
        let b = a.clone();
        assert!(a.diff(&b).is_empty());
        a.os = "macos".into();
        let mismatches = a.diff(&b);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "os");
    }
}
