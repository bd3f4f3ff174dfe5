//! `Worker` trait and name-keyed registry. The worker and verifier
//! registries are the one place in this system that look up behavior by
//! string key rather than by static type.
//!
//! Invoking a real external coding agent and interpreting its prompt or
//! response format is explicitly out of scope: [`CliWorker`] only defines
//! the *contract* a worker binary must honor -- take a JSON call envelope
//! on stdin, and print the phase-appropriate structured result as JSON on
//! stdout. What a worker does between those two points is its own concern.

use std::path::Path;
use std::time::Duration;

use runr_process::run_command_with_timeout;
use runr_types::{Implementation, Phase, Plan, Review, WorkerCapability, WorkerFailure};
use serde::Serialize;

/// One call to a [`Worker`].
pub struct WorkerCall<'a> {
    pub phase: Phase,
    pub task_text: &'a str,
    pub context_pack: Option<&'a str>,
    pub prior_review_notes: Option<&'a str>,
    pub timeout: Duration,
}

/// Typed result of a successful worker call, one variant per phase that
/// calls a worker.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Plan(Plan),
    Implementation(Implementation),
    Review(Review),
}

/// Error surfaced by a failed worker call. The supervisor loop branches on
/// which of these happened (parse failures retry once then stop; an
/// unavailable worker falls back to the configured fallback worker; a
/// timeout is a stall), so unlike the rest of this workspace this one
/// error earns a typed enum instead of `anyhow`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerCallError {
    #[error("worker {worker} produced output that could not be parsed as {expected}: {detail}")]
    ParseFailed {
        worker: String,
        expected: &'static str,
        detail: String,
    },
    #[error("worker {worker} is not available: {detail}")]
    Unavailable { worker: String, detail: String },
    #[error("worker {worker} did not respond within {timeout_ms}ms")]
    TimedOut { worker: String, timeout_ms: u64 },
}

impl WorkerCallError {
    /// Project onto the three-valued [`WorkerFailure`] for events
    /// and stop-reason classification.
    pub fn classify(&self) -> WorkerFailure {
        match self {
            WorkerCallError::ParseFailed { .. } => WorkerFailure::ParseFailed,
            WorkerCallError::Unavailable { .. } => WorkerFailure::WorkerUnavailable,
            WorkerCallError::TimedOut { .. } => WorkerFailure::Timeout,
        }
    }
}

/// A named agent capable of handling one or more phases.
pub trait Worker {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &[WorkerCapability];
    fn call(&self, call: &WorkerCall, working_dir: &Path) -> Result<WorkerOutcome, WorkerCallError>;
}

#[derive(Serialize)]
struct CallEnvelope<'a> {
    phase: Phase,
    task_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_pack: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prior_review_notes: Option<&'a str>,
}

/// A worker backed by an external binary on `PATH`, invoked via the
/// call/response contract: the envelope above on stdin, one JSON value on
/// stdout shaped like whichever of [`Plan`], [`Implementation`], or
/// [`Review`] the call's phase expects.
pub struct CliWorker {
    name: String,
    binary: String,
    capabilities: Vec<WorkerCapability>,
}

impl CliWorker {
    pub fn new(name: impl Into<String>, binary: impl Into<String>, capabilities: Vec<WorkerCapability>) -> Self {
        Self { name: name.into(), binary: binary.into(), capabilities }
    }

    fn invoke(&self, call: &WorkerCall, working_dir: &Path) -> Result<String, WorkerCallError> {
        if !runr_process::command_exists(&self.binary) {
            return Err(WorkerCallError::Unavailable {
                worker: self.name.clone(),
                detail: format!("binary `{}` not found on PATH", self.binary),
            });
        }
        let envelope = CallEnvelope {
            phase: call.phase,
            task_text: call.task_text,
            context_pack: call.context_pack,
            prior_review_notes: call.prior_review_notes,
        };
        let envelope_json = serde_json::to_string(&envelope).map_err(|e| WorkerCallError::ParseFailed {
            worker: self.name.clone(),
            expected: "call envelope",
            detail: e.to_string(),
        })?;

        let output = run_command_with_timeout(
            &self.binary,
            &["--call", &envelope_json],
            working_dir,
            Some(call.timeout),
        )
        .map_err(|e| WorkerCallError::Unavailable { worker: self.name.clone(), detail: e.to_string() })?;

        if output.timed_out {
            return Err(WorkerCallError::TimedOut {
                worker: self.name.clone(),
                timeout_ms: call.timeout.as_millis() as u64,
            });
        }
        if output.exit_code != 0 {
            return Err(WorkerCallError::Unavailable {
                worker: self.name.clone(),
                detail: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        Ok(output.stdout)
    }
}

impl Worker for CliWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[WorkerCapability] {
        &self.capabilities
    }

    fn call(&self, call: &WorkerCall, working_dir: &Path) -> Result<WorkerOutcome, WorkerCallError> {
        let stdout = self.invoke(call, working_dir)?;
        let parse_err = |expected: &'static str, e: serde_json::Error| WorkerCallError::ParseFailed {
            worker: self.name.clone(),
            expected,
            detail: e.to_string(),
        };
        match call.phase {
            Phase::Plan => {
                let plan: Plan = serde_json::from_str(&stdout).map_err(|e| parse_err("Plan", e))?;
                Ok(WorkerOutcome::Plan(plan))
            }
            Phase::Implement => {
                let implementation: Implementation =
                    serde_json::from_str(&stdout).map_err(|e| parse_err("Implementation", e))?;
                Ok(WorkerOutcome::Implementation(implementation))
            }
            Phase::Review => {
                let review: Review = serde_json::from_str(&stdout).map_err(|e| parse_err("Review", e))?;
                Ok(WorkerOutcome::Review(review))
            }
            other => Err(WorkerCallError::Unavailable {
                worker: self.name.clone(),
                detail: format!("{other:?} has no worker call"),
            }),
        }
    }
}

/// Name-keyed registry of workers, with fallback lookup: an unavailable
/// worker falls back to the configured fallback worker.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Vec<Box<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Box<dyn Worker>) {
        self.workers.push(worker);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Worker> {
        self.workers.iter().find(|w| w.name() == name).map(|w| w.as_ref())
    }

    /// The standard two-worker registry this workspace ships with:
    /// `codex` and `claude`, both full plan/implement/review capable.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CliWorker::new(
            "codex",
            "codex",
            vec![WorkerCapability::PlanTask, WorkerCapability::Implement, WorkerCapability::Review],
        )));
        registry.register(Box::new(CliWorker::new(
            "claude",
            "claude",
            vec![WorkerCapability::PlanTask, WorkerCapability::Implement, WorkerCapability::Review],
        )));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_looks_up_by_name() {
        let registry = WorkerRegistry::with_defaults();
        assert!(registry.get("codex").is_some());
        assert!(registry.get("claude").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn missing_binary_reports_unavailable() {
        let worker = CliWorker::new("ghost", "definitely-not-a-real-binary-xyz", vec![WorkerCapability::Implement]);
        let call = WorkerCall {
            phase: Phase::Implement,
            task_text: "do the thing",
            context_pack: None,
            prior_review_notes: None,
            timeout: Duration::from_secs(1),
        };
        let dir = tempfile::tempdir().unwrap();
        let err = worker.call(&call, dir.path()).unwrap_err();
        assert_eq!(err.classify(), WorkerFailure::WorkerUnavailable);
    }

    #[test]
    fn wrong_phase_for_worker_shape_is_unavailable() {
        let worker = CliWorker::new("echoer", "true", vec![WorkerCapability::PlanTask]);
        let call = WorkerCall {
            phase: Phase::Checkpoint,
            task_text: "n/a",
            context_pack: None,
            prior_review_notes: None,
            timeout: Duration::from_secs(1),
        };
        let dir = tempfile::tempdir().unwrap();
        let err = worker.call(&call, dir.path());
        assert!(err.is_err());
    }
}
