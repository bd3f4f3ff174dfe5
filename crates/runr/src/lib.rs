//! # runr
//!
//! A supervisor for long-running AI coding agents: it drives external
//! worker processes (planning, implementation, review) through a
//! deterministic phase machine against a git repository, enforces scope
//! and dependency guards, records every run as a replayable event
//! timeline, and coordinates multiple concurrent tracks via an
//! orchestrator layered above individual runs.
//!
//! This crate is a thin facade over the workspace's microcrates, each
//! independently published and each swappable via its own `micro-*`
//! feature (all enabled by default). Swapping a feature off drops that
//! microcrate's dependency edge entirely -- useful for a consumer that
//! only wants, say, [`scope`] or [`types`] without pulling in the full
//! supervisor.
//!
//! ## Modules
//!
//! - [`types`] -- shared domain types: `RunId`, `RunState`, `Milestone`,
//!   `Event`, `Artifact`, `RepoContext`, `OwnershipClaim`,
//!   `OrchestratorState`, `Track`, `Step`, `StopReason`, `Phase`.
//! - [`events`] -- the append-only JSONL event log and `seq.txt`
//!   allocation.
//! - [`store`] -- `RunStore`: directory layout, atomic state snapshot,
//!   artifact/memo storage, fingerprint read/write.
//! - [`scope`] -- `ScopeGuard`: glob allow/deny, lockfile/denylist
//!   checks, pattern-overlap detection.
//! - [`policy`] -- `VerificationPolicy`: risk level to verification tier
//!   mapping.
//! - [`process`] -- cross-platform child-process execution with timeout,
//!   used to invoke workers and verifiers.
//! - [`retry`] -- configurable retry/backoff strategies driving
//!   IMPLEMENT-retry and auto-resume backoff.
//! - [`environment`] -- environment fingerprint capture and diff.
//! - [`git`] -- git plumbing: cleanliness checks, context capture,
//!   checkpoint commit creation, checkpoint-subject log scanning.
//! - [`config`] -- `.agent/runr.config.json` / `.runr.toml` loading and
//!   merging into runtime options.
//! - [`supervisor`] -- the core control plane: preflight, per-run state
//!   machine, supervisor loop, resume engine, ownership/collision,
//!   orchestrator state machine, terminal artifact writers.
//!
//! ## CLI usage
//!
//! For command-line usage, see the [runr-cli crate](https://crates.io/crates/runr-cli).

/// Shared domain types. Re-exported from the `runr-types` microcrate.
#[cfg(feature = "micro-types")]
pub use runr_types as types;

/// Append-only JSONL event log. Re-exported from the `runr-events` microcrate.
#[cfg(feature = "micro-events")]
pub use runr_events as events;

/// Run store: directory layout, state snapshot, artifacts. Re-exported
/// from the `runr-store` microcrate.
#[cfg(feature = "micro-store")]
pub use runr_store as store;

/// Scope guard: allow/deny globs, lockfile checks, pattern overlap.
/// Re-exported from the `runr-scope` microcrate.
#[cfg(feature = "micro-scope")]
pub use runr_scope as scope;

/// Verification policy: risk level to tier mapping. Re-exported from the
/// `runr-policy` microcrate.
#[cfg(feature = "micro-policy")]
pub use runr_policy as policy;

/// Cross-platform child-process execution with timeout. Re-exported
/// from the `runr-process` microcrate.
#[cfg(feature = "micro-process")]
pub use runr_process as process;

/// Configurable retry/backoff strategies. Re-exported from the
/// `runr-retry` microcrate.
#[cfg(feature = "micro-retry")]
pub use runr_retry as retry;

/// Environment fingerprint capture and diff. Re-exported from the
/// `runr-environment` microcrate.
#[cfg(feature = "micro-environment")]
pub use runr_environment as environment;

/// Git plumbing: cleanliness, context, checkpoint commits. Re-exported
/// from the `runr-git` microcrate.
#[cfg(feature = "micro-git")]
pub use runr_git as git;

/// Config file loading and merging. Re-exported from the `runr-config`
/// microcrate.
#[cfg(feature = "micro-config")]
pub use runr_config as config;

/// The core control plane: preflight, state machine, supervisor loop,
/// resume engine, ownership/collision, orchestrator. Re-exported from
/// the `runr-supervisor` microcrate.
#[cfg(feature = "micro-supervisor")]
pub use runr_supervisor as supervisor;
