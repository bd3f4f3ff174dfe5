//! Terminal artifact writers: per-run stop summaries and
//! the orchestrator's terminal artifact sequence.
//!
//! **Order is the contract, not a style choice**: consumers watch for
//! `complete.json` or `stop.json` and may assume every earlier artifact
//! already exists once they see it. [`write_orchestrator_terminal_artifacts`]
//! writes `summary.json`, then `orchestration.md`, then `receipt.json` +
//! `receipt.md`, and only then the completion marker -- a receipt-last
//! write ordering generalized from one terminal file to four.

use std::path::Path;

use anyhow::{Context, Result};
use runr_store::{atomic_write_json, RunStore};
use runr_types::{OrchestratorState, RunId, RunState, RunStatus, StopReason};
use serde::Serialize;

use crate::orchestrator::handoffs_dir;

/// A single summary-line one-liner with the stop reason.
pub fn one_liner(state: &RunState) -> String {
    match state.stop_reason {
        Some(StopReason::Complete) => format!("run {} complete ({} milestone(s))", state.run_id, state.milestones.len()),
        Some(reason) => format!("run {} stopped: {reason:?}", state.run_id),
        None => format!("run {} in progress (phase {:?})", state.run_id, state.phase),
    }
}

/// `unattributed_ms`: time between a run's first recorded event and a
/// later phase's start. Can legitimately
/// go negative across a resume boundary (phase timestamps pre-date the
/// resumed run's restart); reported as-is with a label rather than
/// clamped to zero.
pub fn unattributed_ms(run_started_ms: i64, phase_started_ms: i64) -> (i64, Option<&'static str>) {
    let delta = phase_started_ms - run_started_ms;
    if delta < 0 { (delta, Some("(resume/gap)")) } else { (delta, None) }
}

/// The detailed multi-section diagnostic written to `summary.md`: scope
/// violations if any, verifier log paths, and the suggested follow-up
/// command.
pub fn render_run_summary(state: &RunState) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", one_liner(state)));
    out.push_str(&format!("- phase: {:?}\n", state.phase));
    out.push_str(&format!("- milestone: {}/{}\n", state.milestone_index, state.milestones.len()));
    if let Some(sha) = &state.checkpoint_commit_sha {
        out.push_str(&format!("- last checkpoint: {sha}\n"));
    }

    if let Some(evidence) = &state.last_verification_evidence {
        out.push_str("\n## Verification\n\n");
        out.push_str(&format!("- tiers run: {:?}\n", evidence.tiers_run));
        out.push_str(&format!("- passed: {}\n", evidence.passed));
        for path in &evidence.log_paths {
            out.push_str(&format!("- log: {}\n", path.display()));
        }
    }

    if let Some(reason) = state.stop_reason {
        if matches!(reason, StopReason::GuardViolation | StopReason::PlanScopeViolation) {
            out.push_str("\n## Scope violations\n\n");
            out.push_str("see the `guard_violation` event payload in timeline.jsonl for the offending paths\n");
        }
        let suggestion = reason.suggested_command(&state.run_id);
        if !suggestion.is_empty() {
            out.push_str(&format!("\n## Suggested next step\n\n```\n{suggestion}\n```\n"));
        }
    }

    out
}

/// Write the per-run stop receipt: `summary.md` under the run
/// directory.
pub fn write_run_summary(store: &RunStore, state: &RunState) -> Result<()> {
    store.write_summary(&render_run_summary(state))
}

/// `handoffs/summary.json`: the cheap, at-a-glance
/// orchestration rollup. First of the four terminal artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSummary {
    pub orchestrator_id: String,
    pub status: RunStatus,
    pub tracks_total: usize,
    pub tracks_complete: usize,
    pub tracks_stopped: usize,
    pub tracks_failed: usize,
}

impl OrchestratorSummary {
    pub fn build(state: &OrchestratorState) -> Self {
        let mut complete = 0usize;
        let mut stopped = 0usize;
        let mut failed = 0usize;
        for track in &state.tracks {
            match track.status {
                RunStatus::Complete => complete += 1,
                RunStatus::Stopped => stopped += 1,
                RunStatus::Failed => failed += 1,
                _ => {}
            }
        }
        Self {
            orchestrator_id: state.orchestrator_id.to_string(),
            status: state.status,
            tracks_total: state.tracks.len(),
            tracks_complete: complete,
            tracks_stopped: stopped,
            tracks_failed: failed,
        }
    }
}

/// `handoffs/orchestration.md`: per-track breakdown, second
/// of the four terminal artifacts.
pub fn render_orchestration_md(state: &OrchestratorState) -> String {
    let summary = OrchestratorSummary::build(state);
    let mut out = String::new();
    out.push_str(&format!("# orchestration {}\n\n", state.orchestrator_id));
    out.push_str(&format!("- status: {:?}\n", summary.status));
    out.push_str(&format!(
        "- tracks: {} complete, {} stopped, {} failed, {} total\n\n",
        summary.tracks_complete, summary.tracks_stopped, summary.tracks_failed, summary.tracks_total
    ));
    out.push_str("## Tracks\n\n");
    for track in &state.tracks {
        out.push_str(&format!("### {} ({:?})\n\n", track.name, track.status));
        for (i, step) in track.steps.iter().enumerate() {
            let marker = if i == track.current_step { "->" } else { "  " };
            out.push_str(&format!("{marker} step {i}: {}", step.task_path.display()));
            if let Some(result) = &step.result {
                out.push_str(&format!(" [{:?}", result.status));
                if let Some(reason) = result.stop_reason {
                    out.push_str(&format!(", {reason:?}"));
                }
                out.push(']');
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// One track's entry in `handoffs/receipt.json`.
#[derive(Debug, Clone, Serialize)]
pub struct TrackReceipt {
    pub track_id: String,
    pub status: RunStatus,
    pub run_ids: Vec<RunId>,
}

/// `handoffs/receipt.json` + its `receipt.md` companion:
/// third of the four terminal artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorReceipt {
    pub orchestrator_id: String,
    pub status: RunStatus,
    pub tracks: Vec<TrackReceipt>,
}

impl OrchestratorReceipt {
    pub fn build(state: &OrchestratorState) -> Self {
        Self {
            orchestrator_id: state.orchestrator_id.to_string(),
            status: state.status,
            tracks: state
                .tracks
                .iter()
                .map(|t| TrackReceipt {
                    track_id: t.id.clone(),
                    status: t.status,
                    run_ids: t.steps.iter().filter_map(|s| s.run_id.clone()).collect(),
                })
                .collect(),
        }
    }
}

pub fn render_receipt_md(receipt: &OrchestratorReceipt) -> String {
    let mut out = String::new();
    out.push_str(&format!("# receipt: orchestration {}\n\n", receipt.orchestrator_id));
    out.push_str(&format!("status: {:?}\n\n", receipt.status));
    for t in &receipt.tracks {
        let runs = t.run_ids.iter().map(RunId::to_string).collect::<Vec<_>>().join(", ");
        out.push_str(&format!("- {} -> {:?} (runs: {runs})\n", t.track_id, t.status));
    }
    out
}

/// `handoffs/complete.json`: all tracks finished successfully. Written
/// LAST, only when no track is `stopped`/`failed`.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteMarker {
    pub orchestrator_id: String,
    pub tracks_total: usize,
}

/// `handoffs/stop.json`: at least one track did not complete. Written
/// LAST, instead of `complete.json`.
#[derive(Debug, Clone, Serialize)]
pub struct StopMarker {
    pub orchestrator_id: String,
    pub reason: String,
    pub blocked_tracks: Vec<String>,
}

/// Write every orchestrator terminal artifact in the prescribed order:
/// `summary.json`, then `orchestration.md`, then `receipt.json` +
/// `receipt.md`, and only
/// then -- last -- either `complete.json` or `stop.json`. A reader polling
/// for either of the last two files can always trust that the earlier
/// three already exist.
pub fn write_orchestrator_terminal_artifacts(repo_root: &Path, state: &OrchestratorState) -> Result<()> {
    let dir = handoffs_dir(repo_root, &state.orchestrator_id);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let summary = OrchestratorSummary::build(state);
    atomic_write_json(&dir.join("summary.json"), &summary).context("writing summary.json")?;

    std::fs::write(dir.join("orchestration.md"), render_orchestration_md(state)).context("writing orchestration.md")?;

    let receipt = OrchestratorReceipt::build(state);
    atomic_write_json(&dir.join("receipt.json"), &receipt).context("writing receipt.json")?;
    std::fs::write(dir.join("receipt.md"), render_receipt_md(&receipt)).context("writing receipt.md")?;

    let unfinished: Vec<String> =
        state.tracks.iter().filter(|t| matches!(t.status, RunStatus::Stopped | RunStatus::Failed)).map(|t| t.id.clone()).collect();

    if unfinished.is_empty() {
        let marker = CompleteMarker { orchestrator_id: state.orchestrator_id.to_string(), tracks_total: state.tracks.len() };
        atomic_write_json(&dir.join("complete.json"), &marker).context("writing complete.json")?;
    } else {
        let marker = StopMarker {
            orchestrator_id: state.orchestrator_id.to_string(),
            reason: "one or more tracks did not complete".to_string(),
            blocked_tracks: unfinished,
        };
        atomic_write_json(&dir.join("stop.json"), &marker).context("writing stop.json")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runr_types::{Milestone, OrchestratorId, OrchestratorPolicy, Phase, RiskLevel, Step, StepResult, Track};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample_run_state(stop_reason: Option<StopReason>) -> RunState {
        let mut state = RunState::new(
            RunId("20260101000000-aaaa".into()),
            PathBuf::from("/repo"),
            vec![Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "runr/run".into(),
        );
        state.stop_reason = stop_reason;
        if stop_reason.is_some() {
            state.phase = Phase::Stopped;
        }
        state
    }

    #[test]
    fn one_liner_reports_complete() {
        let state = sample_run_state(Some(StopReason::Complete));
        assert!(one_liner(&state).contains("complete"));
    }

    #[test]
    fn one_liner_reports_stop_reason() {
        let state = sample_run_state(Some(StopReason::GuardViolation));
        assert!(one_liner(&state).contains("GuardViolation"));
    }

    #[test]
    fn summary_includes_suggested_resume_command() {
        let state = sample_run_state(Some(StopReason::MaxTicksReached));
        let md = render_run_summary(&state);
        assert!(md.contains("runr resume 20260101000000-aaaa"));
    }

    #[test]
    fn summary_flags_scope_violations_section() {
        let state = sample_run_state(Some(StopReason::GuardViolation));
        let md = render_run_summary(&state);
        assert!(md.contains("Scope violations"));
    }

    #[test]
    fn unattributed_ms_labels_negative_values() {
        let (delta, label) = unattributed_ms(10_000, 4_000);
        assert_eq!(delta, -6_000);
        assert_eq!(label, Some("(resume/gap)"));
    }

    #[test]
    fn unattributed_ms_no_label_when_non_negative() {
        let (delta, label) = unattributed_ms(1_000, 5_000);
        assert_eq!(delta, 4_000);
        assert_eq!(label, None);
    }

    fn sample_orchestrator_state(track_statuses: Vec<RunStatus>) -> OrchestratorState {
        let tracks = track_statuses
            .into_iter()
            .enumerate()
            .map(|(i, status)| Track {
                id: format!("track-{i}"),
                name: format!("track-{i}"),
                steps: vec![Step {
                    task_path: PathBuf::from("task.md"),
                    allowlist: Some(vec!["src/**".into()]),
                    owns_raw: Vec::new(),
                    owns_normalized: Vec::new(),
                    run_id: Some(RunId(format!("20260101000000-{i}"))),
                    run_dir: None,
                    result: Some(StepResult { status, stop_reason: None, elapsed_ms: 10 }),
                }],
                current_step: 0,
                status,
            })
            .collect();
        OrchestratorState {
            orchestrator_id: OrchestratorId("20260101000000-orch".into()),
            tracks,
            active_runs: Default::default(),
            file_claims: Default::default(),
            policy: OrchestratorPolicy {
                collision_policy: runr_types::CollisionPolicy::Fail,
                parallel: 2,
                fast: false,
                auto_resume: false,
                time_budget: Duration::from_secs(3600),
                max_ticks: 1000,
                ownership_required: false,
            },
            status: RunStatus::Complete,
        }
    }

    #[test]
    fn all_complete_writes_complete_marker_not_stop() {
        let dir = tempdir().unwrap();
        let state = sample_orchestrator_state(vec![RunStatus::Complete, RunStatus::Complete]);
        write_orchestrator_terminal_artifacts(dir.path(), &state).unwrap();
        let handoffs = handoffs_dir(dir.path(), &state.orchestrator_id);
        assert!(handoffs.join("summary.json").exists());
        assert!(handoffs.join("orchestration.md").exists());
        assert!(handoffs.join("receipt.json").exists());
        assert!(handoffs.join("receipt.md").exists());
        assert!(handoffs.join("complete.json").exists());
        assert!(!handoffs.join("stop.json").exists());
    }

    #[test]
    fn a_stopped_track_writes_stop_marker_not_complete() {
        let dir = tempdir().unwrap();
        let state = sample_orchestrator_state(vec![RunStatus::Complete, RunStatus::Stopped]);
        write_orchestrator_terminal_artifacts(dir.path(), &state).unwrap();
        let handoffs = handoffs_dir(dir.path(), &state.orchestrator_id);
        assert!(handoffs.join("stop.json").exists());
        assert!(!handoffs.join("complete.json").exists());
        let stop: StopMarker = serde_json::from_slice(&std::fs::read(handoffs.join("stop.json")).unwrap()).unwrap();
        assert_eq!(stop.blocked_tracks, vec!["track-1".to_string()]);
    }

    #[test]
    fn summary_json_counts_tracks_by_status() {
        let dir = tempdir().unwrap();
        let state = sample_orchestrator_state(vec![RunStatus::Complete, RunStatus::Stopped, RunStatus::Failed]);
        write_orchestrator_terminal_artifacts(dir.path(), &state).unwrap();
        let handoffs = handoffs_dir(dir.path(), &state.orchestrator_id);
        let summary: OrchestratorSummary = serde_json::from_slice(&std::fs::read(handoffs.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary.tracks_complete, 1);
        assert_eq!(summary.tracks_stopped, 1);
        assert_eq!(summary.tracks_failed, 1);
        assert_eq!(summary.tracks_total, 3);
    }
}
