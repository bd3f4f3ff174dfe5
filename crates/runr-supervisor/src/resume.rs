//! Resume engine: re-entry procedure that rebuilds a
//! [`ResumePlan`] from a stopped run's on-disk state and hands control
//! back to the supervisor loop.

use std::path::Path;

use anyhow::{Context, Result, bail};
use runr_events::EventSource;
use runr_store::RunStore;
use runr_types::{
    CheckpointInfo, CheckpointSource, Delta, EventType, FingerprintMismatch, RepoState, ResumePlan, ResumeTarget,
    RunId, RunState, RESUME_PLAN_SCHEMA_VERSION,
};

use crate::Reporter;

/// Caller-supplied overrides for one resume.
#[derive(Debug, Clone, Default)]
pub struct ResumeOverrides {
    pub allow_deps: bool,
    pub force: bool,
    pub auto_stash: bool,
}

/// Everything the resume engine needed to gather before it could build a
/// [`ResumePlan`] -- kept separate from the plan itself so callers (tests,
/// `--plan` mode) can inspect intermediate state.
pub struct ResumeContext {
    pub state: RunState,
    pub plan: ResumePlan,
    pub fingerprint_mismatches: Vec<FingerprintMismatch>,
}

/// Step 1: load `state.json`; fail with a `run_not_found`-shaped error if
/// the run directory has never been initialized.
fn load_state(store: &RunStore, run_id: &RunId) -> Result<RunState> {
    store
        .read_state()
        .context("reading state.json")?
        .ok_or_else(|| anyhow::anyhow!("run_not_found: no state.json for run {run_id}"))
}

/// Steps 2-7: build the [`ResumePlan`] for an already-loaded `state`,
/// without mutating anything -- the `--plan`-mode half of resume, which
/// prints and exits without side effects.
pub fn build_resume_plan(
    repo_root: &Path,
    effective_repo_path: &Path,
    state: &RunState,
    store: &RunStore,
    overrides: &ResumeOverrides,
    reporter: &mut dyn Reporter,
) -> Result<(ResumePlan, Vec<FingerprintMismatch>)> {
    let mut warnings = Vec::new();

    // Step 3: fingerprint diff.
    let config_snapshot: Option<serde_json::Value> = store.read_config_snapshot().context("reading config snapshot")?;
    let config_bytes = config_snapshot
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()
        .context("serializing config snapshot")?
        .unwrap_or_else(|| b"{}".to_vec());
    let current_fingerprint =
        runr_environment::capture(effective_repo_path, &config_bytes).context("capturing environment fingerprint")?;
    let mismatches = match store.read_fingerprint().context("reading fingerprint.json")? {
        Some(stored) => stored.diff(&current_fingerprint),
        None => Vec::new(),
    };
    if !mismatches.is_empty() {
        if !overrides.force {
            bail!(
                "environment fingerprint mismatch on {} field(s); rerun with force to proceed",
                mismatches.len()
            );
        }
        for m in &mismatches {
            let msg = format!("fingerprint drift: {} was {}, now {}", m.field, m.original, m.current);
            reporter.warn(&msg);
            warnings.push(msg);
        }
    }

    // Step 4: working tree cleanliness + optional auto-stash.
    let clean = runr_git::is_clean(effective_repo_path).context("checking working tree cleanliness")?;
    let dirty_paths = runr_git::changed_files(effective_repo_path, None).unwrap_or_default();
    if !clean {
        if overrides.auto_stash {
            let (stash_ref, count) = runr_git::create_auto_stash(effective_repo_path, &state.run_id)
                .context("creating auto-stash")?;
            store
                .append_event(
                    EventType::auto_stash_created(),
                    EventSource::Supervisor,
                    serde_json::json!({"stash_ref": stash_ref, "file_count": count}),
                )
                .context("appending auto_stash_created event")?;
        } else {
            bail!("working tree is dirty and auto_stash was not requested; refusing to resume");
        }
    }
    let repo_state = RepoState {
        working_tree_clean: clean,
        dirty_paths_sample: dirty_paths.iter().take(10).cloned().collect(),
        dirty_count: dirty_paths.len(),
    };

    // Step 5: discover last checkpoint.
    let checkpoint = runr_git::find_last_checkpoint(effective_repo_path, &state.run_id)
        .unwrap_or(CheckpointInfo { sha: None, milestone_index: -1, source: CheckpointSource::None });

    // Step 6: compute delta since checkpoint.
    let diffstat = checkpoint.sha.as_deref().and_then(|sha| runr_git::diffstat_since(effective_repo_path, sha));
    let lockfiles_changed = dirty_paths.iter().any(|f| f.ends_with(".lock") || f == "Cargo.lock");
    let delta = Delta { diffstat, lockfiles_changed, ignored_noise_count: 0, ignored_noise_sample: Vec::new() };

    // Step 7: construct the ResumePlan.
    let resume_from_milestone_index = (checkpoint.milestone_index + 1).max(0) as usize;
    let remaining_milestones = state.milestones.len().saturating_sub(resume_from_milestone_index);
    let resume_phase = if resume_from_milestone_index >= state.milestones.len() {
        runr_types::Phase::Finalize
    } else {
        runr_types::Phase::Implement
    };

    let plan = ResumePlan {
        schema_version: RESUME_PLAN_SCHEMA_VERSION,
        run_id: state.run_id.clone(),
        repo_path: repo_root.to_path_buf(),
        effective_repo_path: effective_repo_path.to_path_buf(),
        checkpoint,
        resume: ResumeTarget { from_milestone_index: resume_from_milestone_index, phase: resume_phase, remaining_milestones },
        repo_state,
        delta,
        warnings,
    };

    Ok((plan, mismatches))
}

/// Steps 8-9: apply a built [`ResumePlan`] to `state`, emit the `resume`
/// and `run_resumed` events, and return the state machine ready to
/// re-enter the supervisor loop.
pub fn apply_resume_plan(state: RunState, plan: &ResumePlan, store: &RunStore) -> Result<RunState> {
    let mut sm = crate::state_machine::StateMachine::new(state);
    sm.resume_into(plan.resume.from_milestone_index);

    store
        .append_event(EventType::resume(), EventSource::Cli, serde_json::to_value(plan).context("serializing resume plan")?)
        .context("appending resume event")?;
    store
        .append_event(EventType::run_resumed(), EventSource::Supervisor, serde_json::json!({"run_id": sm.state.run_id}))
        .context("appending run_resumed event")?;
    store.write_state(&sm.state).context("writing resumed state")?;

    Ok(sm.state)
}

/// Full resume entry point, skipping the `--plan` early-exit -- callers
/// that want plan-only behavior should call [`build_resume_plan`] directly
/// instead.
pub fn resume_run(
    repo_root: &Path,
    run_id: &RunId,
    overrides: &ResumeOverrides,
    reporter: &mut dyn Reporter,
) -> Result<(RunState, ResumePlan)> {
    let store = RunStore::open(repo_root, run_id);
    let state = load_state(&store, run_id)?;

    let effective_repo_path = if runr_git::worktree_exists(repo_root, run_id) {
        runr_git::worktree_path(repo_root, run_id)
    } else {
        repo_root.to_path_buf()
    };

    let (plan, _mismatches) =
        build_resume_plan(repo_root, &effective_repo_path, &state, &store, overrides, reporter)?;
    let new_state = apply_resume_plan(state, &plan, &store)?;
    reporter.info(&format!(
        "resumed {} at milestone {}/{}",
        run_id, plan.resume.from_milestone_index, state_milestone_total(&new_state)
    ));
    Ok((new_state, plan))
}

fn state_milestone_total(state: &RunState) -> usize {
    state.milestones.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestReporter;
    use runr_types::{Milestone, RiskLevel};
    use std::process::Command;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-b", "main"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.email", "test@example.com"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).output().unwrap();
        std::fs::write(dir.join("a.txt"), "1").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir).output().unwrap();
    }

    #[test]
    fn resume_with_no_checkpoint_starts_at_milestone_zero() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let run_id = RunId("20260101000000-aaaa".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let state = RunState::new(
            run_id.clone(),
            dir.path().to_path_buf(),
            vec![Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "main".into(),
        );
        store.write_state(&state).unwrap();

        let mut reporter = TestReporter::default();
        let overrides = ResumeOverrides { force: true, auto_stash: true, allow_deps: false };
        let (plan, _) = build_resume_plan(dir.path(), dir.path(), &state, &store, &overrides, &mut reporter).unwrap();
        assert_eq!(plan.checkpoint.source, CheckpointSource::None);
        assert_eq!(plan.resume.from_milestone_index, 0);
    }

    #[test]
    fn resume_past_checkpoint_starts_at_next_milestone() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let run_id = RunId("20260101000000-bbbb".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();

        let subject = runr_git::checkpoint_subject(&run_id, 0);
        std::fs::write(dir.path().join("a.txt"), "2").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", &subject]).current_dir(dir.path()).output().unwrap();

        let state = RunState::new(
            run_id.clone(),
            dir.path().to_path_buf(),
            vec![
                Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None },
                Milestone { name: "m1".into(), risk_level: RiskLevel::Low, files_expected: None },
            ],
            "main".into(),
        );
        store.write_state(&state).unwrap();

        let mut reporter = TestReporter::default();
        let overrides = ResumeOverrides { force: true, auto_stash: true, allow_deps: false };
        let (plan, _) = build_resume_plan(dir.path(), dir.path(), &state, &store, &overrides, &mut reporter).unwrap();
        assert_eq!(plan.checkpoint.source, CheckpointSource::RunSpecific);
        assert_eq!(plan.checkpoint.milestone_index, 0);
        assert_eq!(plan.resume.from_milestone_index, 1);
        assert_eq!(plan.resume.remaining_milestones, 1);
    }

    #[test]
    fn dirty_tree_without_auto_stash_refuses() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("b.txt"), "dirty").unwrap();
        let run_id = RunId("20260101000000-cccc".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let state = RunState::new(
            run_id,
            dir.path().to_path_buf(),
            vec![Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "main".into(),
        );
        store.write_state(&state).unwrap();

        let mut reporter = TestReporter::default();
        let overrides = ResumeOverrides { force: true, auto_stash: false, allow_deps: false };
        let result = build_resume_plan(dir.path(), dir.path(), &state, &store, &overrides, &mut reporter);
        assert!(result.is_err());
    }

    #[test]
    fn dirty_tree_with_auto_stash_cleans_and_records_event() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("b.txt"), "dirty").unwrap();
        let run_id = RunId("20260101000000-dddd".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let state = RunState::new(
            run_id,
            dir.path().to_path_buf(),
            vec![Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "main".into(),
        );
        store.write_state(&state).unwrap();

        let mut reporter = TestReporter::default();
        let overrides = ResumeOverrides { force: true, auto_stash: true, allow_deps: false };
        let (plan, _) = build_resume_plan(dir.path(), dir.path(), &state, &store, &overrides, &mut reporter).unwrap();
        assert!(!plan.repo_state.working_tree_clean || runr_git::is_clean(dir.path()).unwrap());
        let events = store.read_timeline().unwrap();
        assert!(events.iter().any(|e| e.event_type.to_string() == "auto_stash_created"));
    }
}
