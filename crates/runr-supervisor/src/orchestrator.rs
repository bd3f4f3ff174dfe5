//! Orchestrator state machine: the multi-track scheduler that
//! sits above per-run supervisors.
//!
//! Grounded in the level-batched scheduling shape of `engine_parallel.rs`
//! (packages within a level published concurrently, one level waited-out
//! before the next starts) but re-cast as a cooperative tick loop instead
//! of that file's `thread::spawn` fan-out, because here "concurrent" means
//! separate child OS processes, not in-process threads: the orchestrator
//! launches child processes, not in-process tasks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use runr_events::EventLog;
use runr_store::{atomic_write_json, read_json, RunStore};
use runr_types::{
    CollisionPolicy, EventSource, EventType, OrchestratorId, OrchestratorState, Phase, RunId, RunStatus, StepResult,
    StopReason, Track,
};

use crate::ownership::{check_allowlist_overlap, AllowlistCheck, ClaimBook};
use crate::Reporter;

pub const ORCHESTRATIONS_DIR: &str = ".agent/orchestrations";
pub const STATE_FILE: &str = "state.json";

pub fn orchestrator_dir(repo_root: &Path, id: &OrchestratorId) -> PathBuf {
    repo_root.join(ORCHESTRATIONS_DIR).join(&id.0)
}

pub fn handoffs_dir(repo_root: &Path, id: &OrchestratorId) -> PathBuf {
    orchestrator_dir(repo_root, id).join("handoffs")
}

/// One scheduling decision. `decide` returns the first
/// actionable one found while scanning tracks in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// All tracks are in `{complete, stopped, failed}`.
    Done,
    /// `track_id` is pending, has no active collision blocker, and
    /// `active_runs.len() < policy.parallel`.
    Launch { track_id: String },
    /// At least one track is running or waiting on a serialized collision.
    Wait { reason: String },
    /// `track_id` cannot proceed: either policy is `fail` and it overlaps
    /// an active track, or ownership is required but the step declares no
    /// claim.
    Blocked { track_id: String, reason: String, colliding_runs: Vec<RunId> },
}

/// What a [`RunLauncher`] hands back once a child run has been started:
/// a Supervisor-equivalent process contract that returns `{run_id,
/// run_dir}`. The launch is fire-and-forget: the orchestrator never
/// blocks on the child, it only learns of completion later through
/// [`Orchestrator::reconcile`] reading the child's `state.json` --
/// communication is one-way.
#[derive(Debug, Clone)]
pub struct LaunchedRun {
    pub run_id: RunId,
    pub run_dir: PathBuf,
}

/// Starts one track's current step as a child run. Implementations shell
/// out to an external process (the `runr` CLI binary itself, typically)
/// the way [`crate::worker::CliWorker`] shells out to a coding agent --
/// the orchestrator never runs a supervisor loop in-process.
pub trait RunLauncher {
    fn launch(&self, orchestrator_id: &OrchestratorId, track: &Track, repo_root: &Path) -> Result<LaunchedRun>;
}

/// Default [`RunLauncher`]: spawns `<binary> run --run-id <id> --task
/// <path>` detached and returns immediately. Never waits on the child --
/// waiting is [`Orchestrator::reconcile`]'s job.
pub struct CommandRunLauncher {
    binary: String,
}

impl CommandRunLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl RunLauncher for CommandRunLauncher {
    fn launch(&self, _orchestrator_id: &OrchestratorId, track: &Track, repo_root: &Path) -> Result<LaunchedRun> {
        let step = track.current().context("track has no current step to launch")?;
        let run_id = RunId::new(Utc::now(), &track.id);
        let run_dir = runr_store::run_dir(repo_root, &run_id);

        std::process::Command::new(&self.binary)
            .arg("run")
            .arg("--run-id")
            .arg(run_id.as_str())
            .arg("--task")
            .arg(&step.task_path)
            .current_dir(repo_root)
            .spawn()
            .with_context(|| format!("spawning `{} run` for track {}", self.binary, track.id))?;

        Ok(LaunchedRun { run_id, run_dir })
    }
}

/// Owns [`OrchestratorState`] and the process-local [`ClaimBook`] guarding
/// it.
pub struct Orchestrator {
    pub state: OrchestratorState,
    claims: ClaimBook,
    repo_root: PathBuf,
    events: EventLog,
}

impl Orchestrator {
    pub fn new(state: OrchestratorState, repo_root: PathBuf) -> Self {
        let events = EventLog::new(orchestrator_dir(&repo_root, &state.orchestrator_id));
        Self { state, claims: ClaimBook::new(), repo_root, events }
    }

    pub fn dir(&self) -> PathBuf {
        orchestrator_dir(&self.repo_root, &self.state.orchestrator_id)
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Idempotently create the orchestration directory tree.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(handoffs_dir(&self.repo_root, &self.state.orchestrator_id))
            .context("creating orchestration handoffs dir")?;
        self.events.init()
    }

    pub fn persist(&self) -> Result<()> {
        atomic_write_json(&self.dir().join(STATE_FILE), &self.state)
    }

    /// Reopen an in-progress orchestration from its `state.json`, for
    /// reconciliation on resume.
    pub fn open(repo_root: &Path, orchestrator_id: &OrchestratorId) -> Result<Self> {
        let dir = orchestrator_dir(repo_root, orchestrator_id);
        let state: OrchestratorState = read_json(&dir.join(STATE_FILE))
            .context("reading orchestration state.json")?
            .ok_or_else(|| anyhow::anyhow!("orchestration_not_found: no state.json for {orchestrator_id}"))?;
        Ok(Self::new(state, repo_root.to_path_buf()))
    }

    fn emit(&self, event_type: EventType, payload: serde_json::Value) -> Result<()> {
        self.events.append(event_type, EventSource::Orchestrator, payload).map(|_| ())
    }

    /// Allowlists belonging to every *other* track currently in
    /// `active_runs` (pre-launch overlap check, layer 1 of the ownership
    /// model).
    fn active_allowlists(&self, exclude_track_id: &str) -> Vec<Vec<String>> {
        self.state
            .tracks
            .iter()
            .filter(|t| t.id != exclude_track_id && self.state.active_runs.contains_key(&t.id))
            .filter_map(|t| t.current().and_then(|s| s.allowlist.clone()))
            .collect()
    }

    /// Best-effort reverse lookup from overlapping patterns back to the
    /// active run(s) that hold them, for [`Decision::Blocked`]'s
    /// `colliding_runs`.
    fn colliding_run_ids(&self, overlaps: &[(String, String)]) -> Vec<RunId> {
        let mut ids = Vec::new();
        for (_, pattern_b) in overlaps {
            for track in &self.state.tracks {
                let holds_pattern =
                    track.current().and_then(|s| s.allowlist.as_ref()).is_some_and(|a| a.iter().any(|p| p == pattern_b));
                if holds_pattern {
                    if let Some(run_id) = self.state.active_runs.get(&track.id) {
                        if !ids.contains(run_id) {
                            ids.push(run_id.clone());
                        }
                    }
                }
            }
        }
        ids
    }

    /// One scheduling decision.
    pub fn decide(&self) -> Decision {
        if self.state.tracks.iter().all(|t| t.is_terminal()) {
            return Decision::Done;
        }

        let mut waiting = false;
        for track in &self.state.tracks {
            match track.status {
                RunStatus::Running | RunStatus::Waiting => waiting = true,
                RunStatus::Pending => {
                    if self.state.active_runs.len() >= self.state.policy.parallel {
                        waiting = true;
                        continue;
                    }
                    let Some(step) = track.current() else { continue };

                    if self.state.policy.ownership_required && step.owns_normalized.is_empty() {
                        return Decision::Blocked {
                            track_id: track.id.clone(),
                            reason: "ownership_required_missing_claim".to_string(),
                            colliding_runs: Vec::new(),
                        };
                    }

                    let candidate = step.allowlist.clone().unwrap_or_default();
                    let active = self.active_allowlists(&track.id);
                    match check_allowlist_overlap(&candidate, &active, self.state.policy.collision_policy) {
                        AllowlistCheck::Clear => return Decision::Launch { track_id: track.id.clone() },
                        AllowlistCheck::Warning { .. } => waiting = true,
                        AllowlistCheck::Blocked { overlaps } => {
                            return Decision::Blocked {
                                track_id: track.id.clone(),
                                reason: "blocked_on_collision".to_string(),
                                colliding_runs: self.colliding_run_ids(&overlaps),
                            };
                        }
                    }
                }
                RunStatus::Complete | RunStatus::Stopped | RunStatus::Failed => {}
            }
        }

        if waiting { Decision::Wait { reason: "tracks in flight or serialized on collision".to_string() } } else { Decision::Done }
    }

    /// Apply a [`Decision::Launch`]: reserve ownership claims
    /// (skipped entirely under `CollisionPolicy::Force`, which ignores
    /// overlap outright), start the child run, and record `active_runs`.
    pub fn launch(&mut self, track_id: &str, launcher: &dyn RunLauncher, reporter: &mut dyn Reporter) -> Result<LaunchedRun> {
        let track_index =
            self.state.tracks.iter().position(|t| t.id == track_id).with_context(|| format!("unknown track {track_id}"))?;

        if self.state.policy.collision_policy != CollisionPolicy::Force {
            let step = self.state.tracks[track_index].current().with_context(|| format!("track {track_id} has no current step"))?;
            self.claims.reserve(track_id, None, step.owns_raw.clone(), step.owns_normalized.clone()).map_err(|conflict| {
                anyhow::anyhow!(
                    "ownership conflict launching track {}: track {} already holds overlapping pattern {} vs {}",
                    conflict.claimant_track_id,
                    conflict.conflicting_track_id,
                    conflict.pattern_a,
                    conflict.pattern_b
                )
            })?;
        }

        let launched = launcher.launch(&self.state.orchestrator_id, &self.state.tracks[track_index], &self.repo_root)?;

        self.state.active_runs.insert(track_id.to_string(), launched.run_id.clone());
        let track = &mut self.state.tracks[track_index];
        track.status = RunStatus::Running;
        let step_index = track.current_step;
        track.steps[step_index].run_id = Some(launched.run_id.clone());
        track.steps[step_index].run_dir = Some(launched.run_dir.clone());

        self.emit(EventType::orchestrator_launch(), serde_json::json!({"track_id": track_id, "run_id": launched.run_id}))?;
        reporter.info(&format!("launched track {track_id} as run {}", launched.run_id));
        Ok(launched)
    }

    /// Record a [`Decision::Wait`].
    pub fn wait(&self, reason: &str) -> Result<()> {
        self.emit(EventType::orchestrator_wait(), serde_json::json!({"reason": reason}))
    }

    /// Record a [`Decision::Blocked`]; the caller decides
    /// whether to stop the whole orchestration or just that track.
    pub fn blocked(&mut self, track_id: &str, reason: &str, colliding_runs: &[RunId], reporter: &mut dyn Reporter) -> Result<()> {
        self.emit(
            EventType::orchestrator_blocked(),
            serde_json::json!({"track_id": track_id, "reason": reason, "colliding_runs": colliding_runs}),
        )?;
        if let Some(track) = self.state.tracks.iter_mut().find(|t| t.id == track_id) {
            track.status = RunStatus::Stopped;
        }
        reporter.warn(&format!("track {track_id} blocked: {reason}"));
        Ok(())
    }

    /// Fold a terminated child run's result back into its track: ownership
    /// is released and the track advances to the next step or terminates.
    pub fn record_step_result(&mut self, track_id: &str, result: StepResult) -> Result<()> {
        self.claims.release(track_id);
        self.state.active_runs.remove(track_id);

        let track = self.state.tracks.iter_mut().find(|t| t.id == track_id).with_context(|| format!("unknown track {track_id}"))?;
        let step_index = track.current_step;
        let next_status = match result.status {
            RunStatus::Complete if step_index + 1 < track.steps.len() => {
                track.current_step += 1;
                RunStatus::Pending
            }
            RunStatus::Complete => RunStatus::Complete,
            other => other,
        };
        track.steps[step_index].result = Some(result);
        track.status = next_status;
        Ok(())
    }

    /// Reconciliation on resume: for every track recorded in
    /// `active_runs`, probe the child's `state.json`. A terminal child is
    /// folded in immediately; a still-running child is left untouched for
    /// the next `decide()` to `Wait` on. Probing is idempotent -- safe to
    /// call every tick, not just once after a crash.
    pub fn reconcile(&mut self, reporter: &mut dyn Reporter) -> Result<()> {
        let active: Vec<(String, RunId)> = self.state.active_runs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (track_id, run_id) in active {
            let store = RunStore::open(&self.repo_root, &run_id);
            let Some(run_state) = store.read_state().context("reading child run state.json")? else {
                continue;
            };
            if run_state.phase != Phase::Stopped {
                continue;
            }

            let timeline = store.read_timeline().unwrap_or_default();
            let elapsed_ms = match (timeline.first(), timeline.last()) {
                (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds().max(0) as u64,
                _ => 0,
            };
            let status = if run_state.stop_reason == Some(StopReason::Complete) { RunStatus::Complete } else { RunStatus::Stopped };
            reporter.info(&format!("reconciled track {track_id}: child run {run_id} terminal ({status:?})"));
            self.record_step_result(&track_id, StepResult { status, stop_reason: run_state.stop_reason, elapsed_ms })?;
        }
        Ok(())
    }

    /// Record the terminal `done` decision.
    pub fn done(&self) -> Result<()> {
        self.emit(EventType::orchestrator_done(), serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestReporter;
    use runr_types::{OrchestratorPolicy, Step};
    use std::time::Duration;
    use tempfile::tempdir;

    fn policy(collision_policy: CollisionPolicy, parallel: usize) -> OrchestratorPolicy {
        OrchestratorPolicy {
            collision_policy,
            parallel,
            fast: false,
            auto_resume: false,
            time_budget: Duration::from_secs(3600),
            max_ticks: 1000,
            ownership_required: false,
        }
    }

    fn track(id: &str, allowlist: Vec<&str>) -> Track {
        Track {
            id: id.to_string(),
            name: id.to_string(),
            steps: vec![Step {
                task_path: PathBuf::from("task.md"),
                allowlist: Some(allowlist.into_iter().map(String::from).collect()),
                owns_raw: Vec::new(),
                owns_normalized: Vec::new(),
                run_id: None,
                run_dir: None,
                result: None,
            }],
            current_step: 0,
            status: RunStatus::Pending,
        }
    }

    fn orchestrator(tracks: Vec<Track>, collision_policy: CollisionPolicy, parallel: usize) -> Orchestrator {
        let state = OrchestratorState {
            orchestrator_id: OrchestratorId("20260101000000-orch".into()),
            tracks,
            active_runs: Default::default(),
            file_claims: Default::default(),
            policy: policy(collision_policy, parallel),
            status: RunStatus::Running,
        };
        Orchestrator::new(state, tempdir().unwrap().keep())
    }

    #[test]
    fn done_when_all_tracks_terminal() {
        let mut t = track("a", vec!["src/**"]);
        t.status = RunStatus::Complete;
        let orch = orchestrator(vec![t], CollisionPolicy::Fail, 2);
        assert_eq!(orch.decide(), Decision::Done);
    }

    #[test]
    fn launches_pending_track_with_no_collision() {
        let orch = orchestrator(vec![track("a", vec!["src/**"])], CollisionPolicy::Fail, 2);
        assert_eq!(orch.decide(), Decision::Launch { track_id: "a".to_string() });
    }

    #[test]
    fn blocks_overlapping_track_under_fail_policy() {
        let mut active = track("a", vec!["src/**"]);
        active.status = RunStatus::Running;
        let waiting = track("b", vec!["src/api/handler.rs"]);
        let mut orch = orchestrator(vec![active, waiting], CollisionPolicy::Fail, 2);
        orch.state.active_runs.insert("a".to_string(), RunId("20260101000000-aaaa".into()));
        match orch.decide() {
            Decision::Blocked { track_id, reason, .. } => {
                assert_eq!(track_id, "b");
                assert_eq!(reason, "blocked_on_collision");
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn waits_on_overlapping_track_under_serialize_policy() {
        let mut active = track("a", vec!["src/**"]);
        active.status = RunStatus::Running;
        let waiting = track("b", vec!["src/api/handler.rs"]);
        let mut orch = orchestrator(vec![active, waiting], CollisionPolicy::Serialize, 2);
        orch.state.active_runs.insert("a".to_string(), RunId("20260101000000-aaaa".into()));
        assert!(matches!(orch.decide(), Decision::Wait { .. }));
    }

    #[test]
    fn parallel_budget_caps_concurrent_launches() {
        let mut a = track("a", vec!["src/a/**"]);
        a.status = RunStatus::Running;
        let b = track("b", vec!["src/b/**"]);
        let mut orch = orchestrator(vec![a, b], CollisionPolicy::Fail, 1);
        orch.state.active_runs.insert("a".to_string(), RunId("20260101000000-aaaa".into()));
        assert!(matches!(orch.decide(), Decision::Wait { .. }));
    }

    #[test]
    fn ownership_required_without_claim_blocks() {
        let mut orch = orchestrator(vec![track("a", vec!["src/**"])], CollisionPolicy::Fail, 2);
        orch.state.policy.ownership_required = true;
        match orch.decide() {
            Decision::Blocked { reason, .. } => assert_eq!(reason, "ownership_required_missing_claim"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn launch_reserves_claim_and_records_active_run() {
        struct FakeLauncher;
        impl RunLauncher for FakeLauncher {
            fn launch(&self, _id: &OrchestratorId, track: &Track, repo_root: &Path) -> Result<LaunchedRun> {
                let run_id = RunId(format!("20260101000000-{}", track.id));
                Ok(LaunchedRun { run_id: run_id.clone(), run_dir: runr_store::run_dir(repo_root, &run_id) })
            }
        }

        let mut t = track("a", vec!["src/**"]);
        t.steps[0].owns_raw = vec!["src/**".into()];
        t.steps[0].owns_normalized = vec!["src/**".into()];
        let mut orch = orchestrator(vec![t], CollisionPolicy::Fail, 2);
        let mut reporter = TestReporter::default();
        let launched = orch.launch("a", &FakeLauncher, &mut reporter).unwrap();
        assert_eq!(orch.state.active_runs.get("a"), Some(&launched.run_id));
        assert_eq!(orch.state.tracks[0].status, RunStatus::Running);
    }

    #[test]
    fn record_step_result_advances_to_next_step() {
        let mut t = track("a", vec!["src/**"]);
        t.steps.push(Step {
            task_path: PathBuf::from("task2.md"),
            allowlist: Some(vec!["src/**".into()]),
            owns_raw: Vec::new(),
            owns_normalized: Vec::new(),
            run_id: None,
            run_dir: None,
            result: None,
        });
        let mut orch = orchestrator(vec![t], CollisionPolicy::Fail, 2);
        orch.state.active_runs.insert("a".to_string(), RunId("20260101000000-aaaa".into()));
        orch.record_step_result("a", StepResult { status: RunStatus::Complete, stop_reason: None, elapsed_ms: 10 }).unwrap();
        assert_eq!(orch.state.tracks[0].current_step, 1);
        assert_eq!(orch.state.tracks[0].status, RunStatus::Pending);
        assert!(!orch.state.active_runs.contains_key("a"));
    }

    #[test]
    fn record_step_result_completes_track_on_last_step() {
        let t = track("a", vec!["src/**"]);
        let mut orch = orchestrator(vec![t], CollisionPolicy::Fail, 2);
        orch.state.active_runs.insert("a".to_string(), RunId("20260101000000-aaaa".into()));
        orch.record_step_result("a", StepResult { status: RunStatus::Complete, stop_reason: None, elapsed_ms: 10 }).unwrap();
        assert_eq!(orch.state.tracks[0].status, RunStatus::Complete);
    }

    #[test]
    fn init_and_persist_round_trip_state() {
        let t = track("a", vec!["src/**"]);
        let orch = orchestrator(vec![t], CollisionPolicy::Fail, 2);
        orch.init().unwrap();
        orch.persist().unwrap();
        let reopened = Orchestrator::open(&orch.repo_root, &orch.state.orchestrator_id).unwrap();
        assert_eq!(reopened.state.tracks.len(), 1);
    }
}
