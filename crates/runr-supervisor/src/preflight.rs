//! Preflight gate: composes [`RepoContext`] construction,
//! `ScopeGuard`, `VerificationPolicy`, and an optional ping of external
//! worker binaries into one decision. A run proceeds only when
//! `guard.ok`.

use std::path::Path;
use std::time::Duration;

use runr_config::RunrConfig;
use runr_policy::{PolicyDecision, PolicyInputs, select_tiers};
use runr_process::run_command_with_timeout;
use runr_scope::{check_lockfiles, check_scope};
use runr_types::{RepoContext, RiskLevel};

/// Result of the ScopeGuard half of preflight.
#[derive(Debug, Clone, Default)]
pub struct GuardResult {
    pub ok: bool,
    pub reasons: Vec<String>,
    pub dirty: bool,
    pub scope_violations: Vec<String>,
    pub lockfile_violations: Vec<String>,
}

/// Result of pinging one configured worker binary.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub worker: String,
    pub ok: bool,
}

/// Result of the optional worker-availability ping. Skipped
/// entirely when the caller passes no worker names to ping.
#[derive(Debug, Clone, Default)]
pub struct PingResult {
    pub ok: bool,
    pub skipped: bool,
    pub results: Vec<PingOutcome>,
}

/// Full preflight outcome.
pub struct PreflightResult {
    pub repo_context: RepoContext,
    pub guard: GuardResult,
    pub ping: PingResult,
    pub tiers: PolicyDecision,
}

/// Ping a worker binary with `--version` to confirm it's reachable on
/// `PATH`, tolerating a short timeout so a hung binary doesn't stall
/// preflight indefinitely.
fn ping_worker(name: &str, repo_root: &Path) -> PingOutcome {
    let ok = runr_process::command_exists(name)
        && run_command_with_timeout(name, &["--version"], repo_root, Some(Duration::from_secs(5)))
            .map(|o| !o.timed_out)
            .unwrap_or(false);
    PingOutcome { worker: name.to_string(), ok }
}

/// Run the full preflight gate. `changed_files` and `dirty` should come
/// from the same `repo_context` capture so the scope check and the
/// dirty-tree flag agree.
pub fn run_preflight(
    repo_context: RepoContext,
    dirty: bool,
    risk_level: RiskLevel,
    config: &RunrConfig,
    worker_names_to_ping: &[String],
) -> PreflightResult {
    let scope = check_scope(&repo_context.changed_files, &config.scope.allowlist, &config.scope.denylist);
    let lockfiles = check_lockfiles(
        &repo_context.changed_files,
        &config.scope.lockfile_patterns,
        config.scope.allow_deps,
    );

    let mut reasons = Vec::new();
    if !scope.ok {
        reasons.push(format!("scope violations: {}", scope.violations.join(", ")));
    }
    if !lockfiles.ok {
        reasons.push(format!("lockfile violations: {}", lockfiles.violations.join(", ")));
    }
    let guard = GuardResult {
        ok: scope.ok && lockfiles.ok,
        reasons,
        dirty,
        scope_violations: scope.violations,
        lockfile_violations: lockfiles.violations,
    };

    let ping = if worker_names_to_ping.is_empty() {
        PingResult { ok: true, skipped: true, results: Vec::new() }
    } else {
        let results: Vec<PingOutcome> = worker_names_to_ping
            .iter()
            .map(|name| ping_worker(name, &repo_context.git_root))
            .collect();
        PingResult { ok: results.iter().any(|r| r.ok), skipped: false, results }
    };

    let tiers = select_tiers(&PolicyInputs {
        changed_files: &repo_context.changed_files,
        risk_level,
        is_milestone_end: false,
        is_run_end: false,
        risk_triggers: &config.scope.risk_triggers,
    });

    PreflightResult { repo_context, guard, ping, tiers }
}
