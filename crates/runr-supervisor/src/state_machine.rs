//! Per-run phase transition table.
//!
//! `StateMachine` wraps a [`RunState`] and exposes one method per edge in
//! the phase graph. Each method is the only place that mutates `phase`,
//! `phase_attempt`, or `milestone_index` for its edge -- callers (the
//! supervisor loop) decide *when* to call a transition; the state machine
//! decides *what* the resulting state looks like and whether a bound was
//! exceeded.

use chrono::Utc;
use runr_types::{Phase, ReviewVerdict, RunState, StopReason, VerificationEvidence};

/// Wraps one run's mutable state and applies phase-graph edges to it.
pub struct StateMachine {
    pub state: RunState,
}

/// Outcome of a VERIFY tick: VERIFY advances to REVIEW once all selected
/// tiers pass, otherwise it retries IMPLEMENT, bounded by
/// `max_verify_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    AdvanceToReview,
    RetryImplement,
    StoppedMaxRetries,
}

/// Outcome of a REVIEW tick: REVIEW loops back to IMPLEMENT on a revise
/// verdict, bounded by `max_review_rounds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    AdvanceToCheckpoint,
    RetryImplement,
    StoppedReviewLoop,
}

/// Outcome of a FINALIZE tick: whether `milestone_index + 1 ==
/// len(milestones)` decides completion vs. looping back to IMPLEMENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    RunComplete,
    NextMilestone,
}

impl StateMachine {
    pub fn new(state: RunState) -> Self {
        Self { state }
    }

    fn touch(&mut self) {
        self.state.updated_at = Utc::now();
    }

    fn reset_phase_attempt(&mut self) {
        self.state.phase_attempt = 0;
    }

    fn enter(&mut self, phase: Phase) {
        self.state.last_successful_phase = Some(self.state.phase);
        self.state.phase = phase;
        self.reset_phase_attempt();
        self.touch();
    }

    /// INIT→PLAN, or INIT→IMPLEMENT directly in fast mode.
    pub fn transition_init(&mut self, fast: bool) {
        debug_assert_eq!(self.state.phase, Phase::Init);
        if fast {
            self.enter(Phase::Implement);
        } else {
            self.enter(Phase::Plan);
        }
    }

    /// PLAN→IMPLEMENT once a Plan has been accepted.
    pub fn transition_plan_to_implement(&mut self) {
        debug_assert_eq!(self.state.phase, Phase::Plan);
        self.enter(Phase::Implement);
    }

    /// IMPLEMENT→VERIFY on worker success + scope check pass for its
    /// output. The scope check itself happens in the
    /// supervisor loop; by the time this is called the check has passed.
    pub fn transition_implement_to_verify(&mut self) {
        debug_assert_eq!(self.state.phase, Phase::Implement);
        self.enter(Phase::Verify);
    }

    /// Apply a VERIFY tick's tier results. `all_passed` decides REVIEW vs.
    /// retry; `max_verify_retries` bounds the retry loop.
    pub fn transition_verify(
        &mut self,
        all_passed: bool,
        evidence: VerificationEvidence,
        max_verify_retries: u32,
    ) -> VerifyOutcome {
        debug_assert_eq!(self.state.phase, Phase::Verify);
        self.state.last_verification_evidence = Some(evidence);
        if all_passed {
            self.enter(Phase::Review);
            return VerifyOutcome::AdvanceToReview;
        }
        if self.state.phase_attempt >= max_verify_retries {
            self.stop(StopReason::VerificationFailedMaxRetries);
            return VerifyOutcome::StoppedMaxRetries;
        }
        self.state.phase_attempt += 1;
        self.state.phase = Phase::Implement;
        self.touch();
        VerifyOutcome::RetryImplement
    }

    /// Apply a REVIEW tick's verdict. `approved` advances to CHECKPOINT;
    /// `revise` loops back to IMPLEMENT, bounded by `max_review_rounds`.
    pub fn transition_review(
        &mut self,
        verdict: ReviewVerdict,
        max_review_rounds: u32,
    ) -> ReviewOutcome {
        debug_assert_eq!(self.state.phase, Phase::Review);
        match verdict {
            ReviewVerdict::Approved => {
                self.enter(Phase::Checkpoint);
                ReviewOutcome::AdvanceToCheckpoint
            }
            ReviewVerdict::Revise => {
                if self.state.phase_attempt >= max_review_rounds {
                    self.stop(StopReason::ReviewLoopDetected);
                    return ReviewOutcome::StoppedReviewLoop;
                }
                self.state.phase_attempt += 1;
                self.state.phase = Phase::Implement;
                self.touch();
                ReviewOutcome::RetryImplement
            }
        }
    }

    /// CHECKPOINT→FINALIZE once the checkpoint commit has been created.
    pub fn transition_checkpoint_to_finalize(&mut self, checkpoint_sha: String) {
        debug_assert_eq!(self.state.phase, Phase::Checkpoint);
        self.state.checkpoint_commit_sha = Some(checkpoint_sha);
        self.enter(Phase::Finalize);
    }

    /// FINALIZE→STOPPED(complete) on the last milestone, otherwise advance
    /// to the next milestone and loop back to IMPLEMENT.
    pub fn transition_finalize(&mut self) -> FinalizeOutcome {
        debug_assert_eq!(self.state.phase, Phase::Finalize);
        if self.state.milestone_index + 1 >= self.state.milestones.len() {
            self.state.milestone_index += 1;
            self.stop(StopReason::Complete);
            FinalizeOutcome::RunComplete
        } else {
            self.state.milestone_index += 1;
            self.state.phase = Phase::Implement;
            self.reset_phase_attempt();
            self.touch();
            FinalizeOutcome::NextMilestone
        }
    }

    /// Stop the run unconditionally, from any phase: any phase can
    /// transition to STOPPED(reason) on a fatal error or budget
    /// exhaustion.
    pub fn stop(&mut self, reason: StopReason) {
        self.state.phase = Phase::Stopped;
        self.state.stop_reason = Some(reason);
        self.touch();
    }

    /// Re-enter the loop from a resume: FINALIZE if the resume target is
    /// past the last milestone, IMPLEMENT otherwise. Clears `stop_reason`
    /// since `phase == Stopped` iff `stop_reason` is set.
    pub fn resume_into(&mut self, from_milestone_index: usize) {
        self.state.milestone_index = from_milestone_index;
        self.state.stop_reason = None;
        self.state.auto_resume_count += 1;
        if from_milestone_index >= self.state.milestones.len() {
            self.state.phase = Phase::Finalize;
        } else {
            self.state.phase = Phase::Implement;
        }
        self.reset_phase_attempt();
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runr_types::{Milestone, RiskLevel, RunId, Tier};
    use std::path::PathBuf;

    fn sample_state(milestones: usize) -> RunState {
        let ms: Vec<Milestone> = (0..milestones)
            .map(|i| Milestone { name: format!("m{i}"), risk_level: RiskLevel::Low, files_expected: None })
            .collect();
        RunState::new(RunId("20260101000000-aaaa".into()), PathBuf::from("/repo"), ms, "runr/run".into())
    }

    fn evidence() -> VerificationEvidence {
        VerificationEvidence { tiers_run: vec![Tier::Tier0], reasons: vec![], passed: true, log_paths: vec![] }
    }

    #[test]
    fn fast_mode_skips_plan() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.transition_init(true);
        assert_eq!(sm.state.phase, Phase::Implement);
    }

    #[test]
    fn normal_mode_goes_through_plan() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.transition_init(false);
        assert_eq!(sm.state.phase, Phase::Plan);
    }

    #[test]
    fn verify_retries_then_stops_at_bound() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.transition_init(true);
        sm.transition_implement_to_verify();

        let out1 = sm.transition_verify(false, evidence(), 2);
        assert_eq!(out1, VerifyOutcome::RetryImplement);
        assert_eq!(sm.state.phase, Phase::Implement);
        assert_eq!(sm.state.phase_attempt, 1);

        sm.state.phase = Phase::Verify;
        let out2 = sm.transition_verify(false, evidence(), 2);
        assert_eq!(out2, VerifyOutcome::RetryImplement);
        assert_eq!(sm.state.phase_attempt, 2);

        sm.state.phase = Phase::Verify;
        let out3 = sm.transition_verify(false, evidence(), 2);
        assert_eq!(out3, VerifyOutcome::StoppedMaxRetries);
        assert_eq!(sm.state.phase, Phase::Stopped);
        assert_eq!(sm.state.stop_reason, Some(StopReason::VerificationFailedMaxRetries));
    }

    #[test]
    fn verify_all_passed_advances_to_review() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.transition_init(true);
        sm.transition_implement_to_verify();
        let out = sm.transition_verify(true, evidence(), 2);
        assert_eq!(out, VerifyOutcome::AdvanceToReview);
        assert_eq!(sm.state.phase, Phase::Review);
    }

    #[test]
    fn review_loop_detected_past_bound() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.state.phase = Phase::Review;
        for _ in 0..3 {
            sm.state.phase = Phase::Review;
            let out = sm.transition_review(ReviewVerdict::Revise, 3);
            if out == ReviewOutcome::StoppedReviewLoop {
                assert_eq!(sm.state.stop_reason, Some(StopReason::ReviewLoopDetected));
                return;
            }
        }
        panic!("expected review loop to be detected within the bound");
    }

    #[test]
    fn review_approved_advances_to_checkpoint() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.state.phase = Phase::Review;
        let out = sm.transition_review(ReviewVerdict::Approved, 3);
        assert_eq!(out, ReviewOutcome::AdvanceToCheckpoint);
        assert_eq!(sm.state.phase, Phase::Checkpoint);
    }

    #[test]
    fn finalize_last_milestone_stops_complete() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.state.phase = Phase::Finalize;
        let out = sm.transition_finalize();
        assert_eq!(out, FinalizeOutcome::RunComplete);
        assert_eq!(sm.state.phase, Phase::Stopped);
        assert_eq!(sm.state.stop_reason, Some(StopReason::Complete));
    }

    #[test]
    fn finalize_mid_run_advances_milestone_and_loops() {
        let mut sm = StateMachine::new(sample_state(3));
        sm.state.phase = Phase::Finalize;
        let out = sm.transition_finalize();
        assert_eq!(out, FinalizeOutcome::NextMilestone);
        assert_eq!(sm.state.milestone_index, 1);
        assert_eq!(sm.state.phase, Phase::Implement);
    }

    #[test]
    fn checkpoint_sets_sha_and_advances() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.state.phase = Phase::Checkpoint;
        sm.transition_checkpoint_to_finalize("abc123".to_string());
        assert_eq!(sm.state.checkpoint_commit_sha, Some("abc123".to_string()));
        assert_eq!(sm.state.phase, Phase::Finalize);
    }

    #[test]
    fn stop_satisfies_invariant() {
        let mut sm = StateMachine::new(sample_state(1));
        sm.stop(StopReason::GuardViolation);
        assert!(sm.state.stop_invariant_holds());
    }

    #[test]
    fn resume_into_clears_stop_reason_and_bumps_counter() {
        let mut sm = StateMachine::new(sample_state(4));
        sm.stop(StopReason::MaxTicksReached);
        sm.resume_into(3);
        assert!(sm.state.stop_reason.is_none());
        assert_eq!(sm.state.phase, Phase::Implement);
        assert_eq!(sm.state.auto_resume_count, 1);
    }

    #[test]
    fn resume_into_past_last_milestone_enters_finalize() {
        let mut sm = StateMachine::new(sample_state(2));
        sm.stop(StopReason::MaxTicksReached);
        sm.resume_into(2);
        assert_eq!(sm.state.phase, Phase::Finalize);
    }
}
