//! Supervisor loop: drives one run's phases, enforcing
//! budgets, stalls, worker retries/fallbacks, and auto-resume scheduling.
//!
//! This is a cooperative, single-task loop: the supervisor
//! blocks on whichever child process (worker or verifier) the current
//! phase requires, then returns to [`Supervisor::tick`]'s caller. There is
//! no separate async cancellation path to race against -- a stall is
//! simply the blocking call itself timing out, and "cancel the worker"
//! is `run_command_with_timeout` killing the child.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use runr_config::RunrConfig;
use runr_events::EventSource;
use runr_policy::{PolicyInputs, select_tiers};
use runr_store::RunStore;
use runr_types::{EventType, Phase, RiskLevel, StopReason, VerificationEvidence};

use crate::Reporter;
use crate::state_machine::{FinalizeOutcome, ReviewOutcome, StateMachine, VerifyOutcome};
use crate::verifier::VerifierRegistry;
use crate::worker::{Worker, WorkerCall, WorkerCallError, WorkerOutcome, WorkerRegistry};

/// What happened on one call to [`Supervisor::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The run is still going; call `tick` again.
    Continue,
    /// The run stopped this tick.
    Stopped(StopReason),
    /// The run stopped on a transient reason and is eligible for
    /// auto-resume after `delay`.
    AutoResumeScheduled { reason: StopReason, delay: Duration },
}

/// Owns a [`StateMachine`] and a [`RunStore`] and drives phases forward
/// one tick at a time.
pub struct Supervisor<'a> {
    pub sm: StateMachine,
    store: RunStore,
    config: RunrConfig,
    repo_root: PathBuf,
    workers: &'a WorkerRegistry,
    verifiers: &'a VerifierRegistry,
    started_at: Instant,
    ticks: u32,
    last_phase: Option<Phase>,
    parse_retry_used_this_phase: bool,
    fallback_used_this_phase: bool,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        sm: StateMachine,
        store: RunStore,
        config: RunrConfig,
        repo_root: PathBuf,
        workers: &'a WorkerRegistry,
        verifiers: &'a VerifierRegistry,
    ) -> Self {
        Self {
            sm,
            store,
            config,
            repo_root,
            workers,
            verifiers,
            started_at: Instant::now(),
            ticks: 0,
            last_phase: None,
            parse_retry_used_this_phase: false,
            fallback_used_this_phase: false,
        }
    }

    fn emit(&self, event_type: EventType, source: EventSource, payload: serde_json::Value) -> Result<()> {
        self.store.append_event(event_type, source, payload).map(|_| ()).context("appending event")
    }

    fn persist(&self) -> Result<()> {
        self.store.write_state(&self.sm.state).context("writing state snapshot")
    }

    fn stop(&mut self, reason: StopReason, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        self.sm.stop(reason);
        self.emit(EventType::stop(), EventSource::Supervisor, serde_json::json!({"reason": reason}))?;
        self.persist()?;
        reporter.warn(&format!("run {} stopped: {reason:?}", self.sm.state.run_id));

        if reason.is_transient()
            && self.config.auto_resume
            && self.sm.state.auto_resume_count < self.config.max_auto_resumes
        {
            let delay = runr_retry::scheduled_delay(&self.config.auto_resume_delays_ms, self.sm.state.auto_resume_count as usize);
            return Ok(TickOutcome::AutoResumeScheduled { reason, delay });
        }
        Ok(TickOutcome::Stopped(reason))
    }

    fn check_budgets(&mut self, reporter: &mut dyn Reporter) -> Result<Option<TickOutcome>> {
        if self.ticks >= self.config.budgets.max_ticks {
            return Ok(Some(self.stop(StopReason::MaxTicksReached, reporter)?));
        }
        if self.started_at.elapsed() >= self.config.budgets.time_budget {
            return Ok(Some(self.stop(StopReason::TimeBudgetExceeded, reporter)?));
        }
        Ok(None)
    }

    fn worker_for_phase(&self, phase: Phase, use_fallback: bool) -> Option<&'a dyn Worker> {
        let primary = match phase {
            Phase::Plan => &self.config.phases.plan,
            Phase::Implement => &self.config.phases.implement,
            Phase::Review => &self.config.phases.review,
            _ => return None,
        };
        let name = if use_fallback { self.config.phases.fallback.as_ref()? } else { primary };
        self.workers.get(name)
    }

    /// Call the configured worker for `phase`, handling the parse-retry
    /// and fallback rules inline. Returns `None` when the caller should
    /// stop this tick (the stop itself has already been recorded).
    fn call_worker(
        &mut self,
        phase: Phase,
        task_text: &str,
        prior_review_notes: Option<&str>,
        parse_failed_reason: StopReason,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<WorkerOutcome>> {
        if self.last_phase != Some(phase) {
            self.parse_retry_used_this_phase = false;
            self.fallback_used_this_phase = false;
            self.last_phase = Some(phase);
        }

        let Some(worker) = self.worker_for_phase(phase, self.fallback_used_this_phase) else {
            self.stop(StopReason::WorkerUnavailable, reporter)?;
            return Ok(None);
        };

        let call = WorkerCall {
            phase,
            task_text,
            context_pack: None,
            prior_review_notes,
            timeout: self.config.budgets.max_worker_call,
        };

        match worker.call(&call, &self.repo_root) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(WorkerCallError::TimedOut { .. }) => {
                self.emit(EventType::stalled_timeout(), EventSource::Supervisor, serde_json::json!({"phase": phase}))?;
                self.stop(StopReason::StalledTimeout, reporter)?;
                Ok(None)
            }
            Err(WorkerCallError::Unavailable { detail, .. }) => {
                if !self.fallback_used_this_phase && self.config.phases.fallback.is_some() {
                    self.fallback_used_this_phase = true;
                    self.emit(
                        EventType::worker_fallback(),
                        EventSource::Supervisor,
                        serde_json::json!({"phase": phase, "detail": detail}),
                    )?;
                    return self.call_worker(phase, task_text, prior_review_notes, parse_failed_reason, reporter);
                }
                self.stop(StopReason::WorkerUnavailable, reporter)?;
                Ok(None)
            }
            Err(WorkerCallError::ParseFailed { detail, .. }) => {
                if !self.parse_retry_used_this_phase {
                    self.parse_retry_used_this_phase = true;
                    reporter.warn(&format!("worker parse failure for {phase:?}, retrying once: {detail}"));
                    return self.call_worker(phase, task_text, prior_review_notes, parse_failed_reason, reporter);
                }
                self.emit(
                    EventType::parse_failed(),
                    EventSource::Supervisor,
                    serde_json::json!({"phase": phase, "detail": detail}),
                )?;
                self.stop(parse_failed_reason, reporter)?;
                Ok(None)
            }
        }
    }

    /// One supervisor tick.
    pub fn tick(&mut self, task_text: &str, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        if self.sm.state.is_stopped() {
            return Ok(TickOutcome::Stopped(self.sm.state.stop_reason.expect("stopped has a reason")));
        }
        if let Some(outcome) = self.check_budgets(reporter)? {
            return Ok(outcome);
        }
        self.ticks += 1;

        self.emit(EventType::phase_start(), EventSource::Supervisor, serde_json::json!({"phase": self.sm.state.phase}))?;

        let outcome = match self.sm.state.phase {
            Phase::Init => {
                self.sm.transition_init(self.config.fast);
                TickOutcome::Continue
            }
            Phase::Plan => self.tick_plan(task_text, reporter)?,
            Phase::Implement => self.tick_implement(task_text, reporter)?,
            Phase::Verify => self.tick_verify(reporter)?,
            Phase::Review => self.tick_review(task_text, reporter)?,
            Phase::Checkpoint => self.tick_checkpoint(reporter)?,
            Phase::Finalize => self.tick_finalize(reporter)?,
            Phase::Stopped => TickOutcome::Stopped(self.sm.state.stop_reason.expect("stopped has a reason")),
        };

        self.persist()?;
        Ok(outcome)
    }

    fn tick_plan(&mut self, task_text: &str, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        let Some(outcome) = self.call_worker(Phase::Plan, task_text, None, StopReason::PlanParseFailed, reporter)?
        else {
            return Ok(TickOutcome::Stopped(self.sm.state.stop_reason.expect("stop recorded")));
        };
        let WorkerOutcome::Plan(plan) = outcome else {
            self.stop(StopReason::PlanParseFailed, reporter)?;
            return Ok(TickOutcome::Stopped(StopReason::PlanParseFailed));
        };
        self.sm.state.milestones = plan.milestones;
        self.emit(
            EventType::plan_generated(),
            EventSource::Worker,
            serde_json::json!({"milestone_count": self.sm.state.milestones.len()}),
        )?;
        self.sm.transition_plan_to_implement();
        Ok(TickOutcome::Continue)
    }

    fn tick_implement(&mut self, task_text: &str, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        let Some(outcome) =
            self.call_worker(Phase::Implement, task_text, None, StopReason::ImplementParseFailed, reporter)?
        else {
            return Ok(TickOutcome::Stopped(self.sm.state.stop_reason.expect("stop recorded")));
        };
        let WorkerOutcome::Implementation(implementation) = outcome else {
            self.stop(StopReason::ImplementParseFailed, reporter)?;
            return Ok(TickOutcome::Stopped(StopReason::ImplementParseFailed));
        };

        let scope = runr_scope::check_scope(
            &implementation.changed_files,
            &self.sm.state.scope_lock.allowlist,
            &self.sm.state.scope_lock.denylist,
        );
        if !scope.ok {
            self.emit(
                EventType::guard_violation(),
                EventSource::Supervisor,
                serde_json::json!({"violations": scope.violations}),
            )?;
            self.stop(StopReason::GuardViolation, reporter)?;
            return Ok(TickOutcome::Stopped(StopReason::GuardViolation));
        }

        self.emit(
            EventType::implement_complete(),
            EventSource::Worker,
            serde_json::json!({"changed_files": implementation.changed_files, "message": implementation.message}),
        )?;
        self.sm.transition_implement_to_verify();
        Ok(TickOutcome::Continue)
    }

    fn tick_verify(&mut self, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        let is_run_end = self.sm.state.milestone_index + 1 >= self.sm.state.milestones.len();
        let risk_level = self.sm.state.current_milestone().map(|m| m.risk_level).unwrap_or(RiskLevel::Low);
        let decision = select_tiers(&PolicyInputs {
            changed_files: &self.sm.state.scope_lock.allowlist,
            risk_level,
            is_milestone_end: true,
            is_run_end,
            risk_triggers: &self.sm.state.scope_lock.lockfile_patterns,
        });

        let artifacts_dir = self.store.artifacts_dir();
        let results = self.verifiers.run_tiers(
            &decision.tiers,
            &self.repo_root,
            &artifacts_dir,
            self.sm.state.milestone_index,
            self.config.budgets.max_verify_time_per_milestone,
        )?;

        for (tier, result) in decision.tiers.iter().zip(results.iter()) {
            let event = if result.ok { EventType::tier_passed() } else { EventType::tier_failed() };
            self.emit(
                event,
                EventSource::Supervisor,
                serde_json::json!({"tier": tier.as_str(), "passed": result.passed, "failed": result.failed}),
            )?;
        }

        let all_passed = results.iter().all(|r| r.ok);
        let evidence = VerificationEvidence {
            tiers_run: decision.tiers.clone(),
            reasons: decision.reasons.clone(),
            passed: all_passed,
            log_paths: results.iter().map(|r| r.log_path.clone()).collect(),
        };
        self.emit(
            EventType::verify_complete(),
            EventSource::Supervisor,
            serde_json::json!({"passed": all_passed}),
        )?;

        let unrecoverable = results.iter().any(|r| r.unrecoverable);
        if unrecoverable {
            self.stop(StopReason::VerificationFailedMaxRetries, reporter)?;
            return Ok(TickOutcome::Stopped(StopReason::VerificationFailedMaxRetries));
        }

        match self.sm.transition_verify(all_passed, evidence, self.config.budgets.max_verify_retries) {
            VerifyOutcome::AdvanceToReview | VerifyOutcome::RetryImplement => Ok(TickOutcome::Continue),
            VerifyOutcome::StoppedMaxRetries => Ok(TickOutcome::Stopped(StopReason::VerificationFailedMaxRetries)),
        }
    }

    fn tick_review(&mut self, task_text: &str, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        let prior_notes = self.sm.state.last_verification_evidence.as_ref().map(|_| "see verification evidence");
        let Some(outcome) =
            self.call_worker(Phase::Review, task_text, prior_notes, StopReason::ReviewParseFailed, reporter)?
        else {
            return Ok(TickOutcome::Stopped(self.sm.state.stop_reason.expect("stop recorded")));
        };
        let WorkerOutcome::Review(review) = outcome else {
            self.stop(StopReason::ReviewParseFailed, reporter)?;
            return Ok(TickOutcome::Stopped(StopReason::ReviewParseFailed));
        };
        self.emit(
            EventType::review_complete(),
            EventSource::Worker,
            serde_json::json!({"verdict": review.verdict, "notes": review.notes}),
        )?;

        match self.sm.transition_review(review.verdict, self.config.budgets.max_review_rounds) {
            ReviewOutcome::AdvanceToCheckpoint | ReviewOutcome::RetryImplement => Ok(TickOutcome::Continue),
            ReviewOutcome::StoppedReviewLoop => Ok(TickOutcome::Stopped(StopReason::ReviewLoopDetected)),
        }
    }

    fn tick_checkpoint(&mut self, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        match runr_git::create_checkpoint_commit(&self.repo_root, &self.sm.state.run_id, self.sm.state.milestone_index as u64)
        {
            Ok(sha) => {
                self.emit(
                    EventType::checkpoint(),
                    EventSource::Supervisor,
                    serde_json::json!({"sha": sha, "milestone_index": self.sm.state.milestone_index}),
                )?;
                self.sm.transition_checkpoint_to_finalize(sha);
                Ok(TickOutcome::Continue)
            }
            Err(e) => {
                reporter.error(&format!("checkpoint commit failed: {e:#}"));
                self.stop(StopReason::GuardViolation, reporter)
            }
        }
    }

    fn tick_finalize(&mut self, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        self.emit(
            EventType::milestone_complete(),
            EventSource::Supervisor,
            serde_json::json!({"milestone_index": self.sm.state.milestone_index}),
        )?;
        match self.sm.transition_finalize() {
            FinalizeOutcome::NextMilestone => Ok(TickOutcome::Continue),
            FinalizeOutcome::RunComplete => {
                self.emit(EventType::run_complete(), EventSource::Supervisor, serde_json::json!({}))?;
                let _ = reporter;
                Ok(TickOutcome::Stopped(StopReason::Complete))
            }
        }
    }

    /// Drain `tick` until the run stops or auto-resume is scheduled.
    /// Callers that want to observe intermediate ticks (e.g. a
    /// `--verbose` CLI mode) should call `tick` themselves instead.
    pub fn run_to_completion(&mut self, task_text: &str, reporter: &mut dyn Reporter) -> Result<TickOutcome> {
        loop {
            match self.tick(task_text, reporter)? {
                TickOutcome::Continue => continue,
                terminal => return Ok(terminal),
            }
        }
    }

    /// A worker result that arrives after the run has already moved past
    /// the phase that issued the call (stall-kill raced with a slow
    /// child, or a user stop). Record it, drop it, and make no state
    /// change.
    pub fn record_late_result(&self, phase: Phase) -> Result<()> {
        self.emit(
            EventType::late_worker_result_ignored(),
            EventSource::Supervisor,
            serde_json::json!({"phase": phase}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestReporter;
    use runr_types::{Milestone, RunId, RunState};
    use tempfile::tempdir;

    fn sample_state(run_id: &str) -> runr_types::RunState {
        RunState::new(
            RunId(run_id.to_string()),
            PathBuf::from("/repo"),
            vec![Milestone { name: "m0".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "runr/run".into(),
        )
    }

    fn empty_registries() -> (WorkerRegistry, VerifierRegistry) {
        (WorkerRegistry::new(), VerifierRegistry::new())
    }

    #[test]
    fn max_ticks_reached_stops_run() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let mut state = sample_state(run_id.as_str());
        state.phase = Phase::Init;
        let mut config = RunrConfig::default();
        config.budgets.max_ticks = 0;
        let (workers, verifiers) = empty_registries();
        let mut sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        let mut reporter = TestReporter::default();
        let outcome = sup.tick("do the thing", &mut reporter).unwrap();
        assert_eq!(outcome, TickOutcome::Stopped(StopReason::MaxTicksReached));
    }

    #[test]
    fn worker_unavailable_without_fallback_stops() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick2".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let mut state = sample_state(run_id.as_str());
        state.phase = Phase::Implement;
        let config = RunrConfig::default();
        let (workers, verifiers) = empty_registries();
        let mut sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        let mut reporter = TestReporter::default();
        let outcome = sup.tick("do the thing", &mut reporter).unwrap();
        assert_eq!(outcome, TickOutcome::Stopped(StopReason::WorkerUnavailable));
    }

    #[test]
    fn stopped_run_short_circuits_tick() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick3".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let mut state = sample_state(run_id.as_str());
        state.phase = Phase::Stopped;
        state.stop_reason = Some(StopReason::Complete);
        let config = RunrConfig::default();
        let (workers, verifiers) = empty_registries();
        let mut sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        let mut reporter = TestReporter::default();
        let outcome = sup.tick("irrelevant", &mut reporter).unwrap();
        assert_eq!(outcome, TickOutcome::Stopped(StopReason::Complete));
    }

    #[test]
    fn finalize_on_last_milestone_completes_run() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick4".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let mut state = sample_state(run_id.as_str());
        state.phase = Phase::Finalize;
        let config = RunrConfig::default();
        let (workers, verifiers) = empty_registries();
        let mut sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        let mut reporter = TestReporter::default();
        let outcome = sup.tick("irrelevant", &mut reporter).unwrap();
        assert_eq!(outcome, TickOutcome::Stopped(StopReason::Complete));
    }

    #[test]
    fn auto_resume_scheduled_on_transient_stop_when_enabled() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick5".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let mut state = sample_state(run_id.as_str());
        state.phase = Phase::Init;
        let mut config = RunrConfig::default();
        config.budgets.max_ticks = 0;
        config.auto_resume = true;
        config.max_auto_resumes = 3;
        let (workers, verifiers) = empty_registries();
        let mut sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        let mut reporter = TestReporter::default();
        let outcome = sup.tick("do the thing", &mut reporter).unwrap();
        assert!(matches!(outcome, TickOutcome::AutoResumeScheduled { reason: StopReason::MaxTicksReached, .. }));
    }

    #[test]
    fn late_result_is_recorded_without_state_change() {
        let dir = tempdir().unwrap();
        let run_id = RunId("20260101000000-tick6".into());
        let store = RunStore::open(dir.path(), &run_id);
        store.init().unwrap();
        let state = sample_state(run_id.as_str());
        let config = RunrConfig::default();
        let (workers, verifiers) = empty_registries();
        let sup = Supervisor::new(StateMachine::new(state), store, config, dir.path().to_path_buf(), &workers, &verifiers);
        sup.record_late_result(Phase::Implement).unwrap();
        let events = sup.store.read_timeline().unwrap();
        assert!(events.iter().any(|e| e.event_type.to_string() == "late_worker_result_ignored"));
    }
}
