//! The runr control plane: the pieces that make one run (and a multi-run
//! orchestration above it) trustworthy and recoverable.
//!
//! This crate composes the leaf crates -- `runr-store`, `runr-events`,
//! `runr-scope`, `runr-policy`, `runr-git`, `runr-environment`,
//! `runr-process`, `runr-retry`, `runr-config` -- into the stateful parts
//! of the system: [`preflight`], [`state_machine`], [`supervisor`],
//! [`resume`], [`worker`], [`verifier`], [`ownership`], [`orchestrator`],
//! and [`receipts`].
//!
//! Errors are `anyhow::Result` throughout, matching the rest of the
//! workspace; the one place a typed error earns its keep is
//! [`worker::WorkerCallError`], which the supervisor loop branches on.

pub mod ownership;
pub mod orchestrator;
pub mod preflight;
pub mod receipts;
pub mod resume;
pub mod state_machine;
pub mod supervisor;
pub mod verifier;
pub mod worker;

/// Minimal logging sink the supervisor and orchestrator write progress to.
/// No `tracing` dependency in this workspace (confirmed absent from the
/// teacher's own microcrates) -- `Reporter` plus `anyhow` is the ambient
/// idiom here, matching `runr::engine::Reporter`.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Test-only [`Reporter`] that records every line instead of printing it,
/// so tests can assert on what was reported.
#[derive(Debug, Default)]
pub struct TestReporter {
    pub lines: Vec<String>,
}

impl Reporter for TestReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(format!("info: {msg}"));
    }
    fn warn(&mut self, msg: &str) {
        self.lines.push(format!("warn: {msg}"));
    }
    fn error(&mut self, msg: &str) {
        self.lines.push(format!("error: {msg}"));
    }
}
