//! `Verifier` trait and tier-keyed registry.
//!
//! A verifier is whatever a repo runs to check one tier: `cargo test` for
//! tier0, `cargo clippy` for tier1, an integration suite for tier2. This
//! crate does not know what those commands are for any given repo --
//! picking and wiring those commands is an external concern.
//! [`CommandVerifier`] is the mechanism: run a configured
//! `(program, args)` pair, capture its output to a log file, and report
//! pass/fail counts the way the command's own exit status permits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use runr_process::run_command_with_timeout;
use runr_types::{Tier, VerifierResult};

/// Runs one verification tier against a working directory and returns its
/// [`VerifierResult`].
pub trait Verifier {
    fn tier(&self) -> Tier;
    fn run(&self, working_dir: &Path, log_path: &Path, timeout: Duration) -> Result<VerifierResult>;
}

/// A verifier backed by a single shell-free command invocation. Stdout and
/// stderr are concatenated and written to `log_path` so `receipts` can
/// reference it from the run's artifact index.
pub struct CommandVerifier {
    tier: Tier,
    program: String,
    args: Vec<String>,
}

impl CommandVerifier {
    pub fn new(tier: Tier, program: impl Into<String>, args: Vec<String>) -> Self {
        Self { tier, program: program.into(), args }
    }
}

impl Verifier for CommandVerifier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn run(&self, working_dir: &Path, log_path: &Path, timeout: Duration) -> Result<VerifierResult> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let output = run_command_with_timeout(&self.program, &args, working_dir, Some(timeout))
            .with_context(|| format!("running verifier tier {:?}", self.tier))?;

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let combined = format!("$ {} {}\n{}\n{}", self.program, self.args.join(" "), output.stdout, output.stderr);
        std::fs::write(log_path, &combined).with_context(|| format!("writing {}", log_path.display()))?;

        let ok = !output.timed_out && output.exit_code == 0;
        Ok(VerifierResult {
            ok,
            log_path: log_path.to_path_buf(),
            duration_ms: output.duration.as_millis() as u64,
            passed: if ok { 1 } else { 0 },
            failed: if ok { 0 } else { 1 },
            unrecoverable: output.timed_out,
        })
    }
}

/// Tier-keyed registry of verifiers for one repo: dynamic dispatch by
/// tier rather than static type.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: BTreeMap<Tier, Box<dyn Verifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, verifier: Box<dyn Verifier>) {
        self.verifiers.insert(verifier.tier(), verifier);
    }

    pub fn get(&self, tier: Tier) -> Option<&dyn Verifier> {
        self.verifiers.get(&tier).map(|v| v.as_ref())
    }

    /// Run every tier in `tiers` in order, short-circuiting (but still
    /// reporting) each tier's outcome. Log files land at
    /// `artifacts_dir/verify_milestone_<n>_<tier>.log`.
    pub fn run_tiers(
        &self,
        tiers: &[Tier],
        working_dir: &Path,
        artifacts_dir: &Path,
        milestone_index: usize,
        timeout: Duration,
    ) -> Result<Vec<VerifierResult>> {
        let mut results = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let Some(verifier) = self.get(*tier) else {
                continue;
            };
            let log_path: PathBuf =
                artifacts_dir.join(format!("verify_milestone_{milestone_index}_{}.log", tier.as_str()));
            results.push(verifier.run(working_dir, &log_path, timeout)?);
        }
        Ok(results)
    }
}
