//! Git plumbing for `runr`: cleanliness checks, [`RepoContext`] capture,
//! checkpoint-commit creation/scanning, and worktree reattach.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;
use runr_types::{CheckpointInfo, CheckpointSource, RepoContext, RunId};

/// Checkpoint commit subject format. The `{run_id}` placeholder is
/// substituted (and regex-escaped) per call; this is the authoritative
/// format going forward.
pub const CHECKPOINT_SUBJECT_FMT: &str = "chore(runr): checkpoint {run_id} milestone {n}";

fn run_git(repo_root: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .with_context(|| format!("failed to run git {:?} in {}", args, repo_root.display()))
}

fn run_git_ok(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = run_git(repo_root, args)?;
    if !output.status.success() {
        bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn git_root(path: &Path) -> Result<PathBuf> {
    let out = run_git_ok(path, &["rev-parse", "--show-toplevel"])?;
    Ok(PathBuf::from(out))
}

/// Working tree is clean (no staged or unstaged changes; untracked files
/// are still "dirty" per `git status --porcelain`, matching the dirty-tree
/// classification used by ScopeGuard/Preflight).
pub fn is_clean(repo_root: &Path) -> Result<bool> {
    let out = run_git_ok(repo_root, &["status", "--porcelain"])?;
    Ok(out.is_empty())
}

pub fn current_branch(repo_root: &Path) -> Result<String> {
    let out = run_git_ok(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(out)
}

/// Best-effort default branch: prefer `origin/HEAD`, fall back to
/// whichever of `main`/`master` exists locally, finally the current
/// branch (e.g. a freshly-initialized repo with no remote).
pub fn default_branch(repo_root: &Path) -> Result<String> {
    if let Ok(out) = run_git_ok(repo_root, &["symbolic-ref", "refs/remotes/origin/HEAD"]) {
        if let Some(name) = out.strip_prefix("refs/remotes/origin/") {
            return Ok(name.to_string());
        }
    }
    for candidate in ["main", "master"] {
        let exists = run_git(repo_root, &["show-ref", "--verify", "--quiet", &format!("refs/heads/{candidate}")])?;
        if exists.status.success() {
            return Ok(candidate.to_string());
        }
    }
    current_branch(repo_root)
}

/// Changed files relative to `base` (a commit-ish), or the working tree's
/// dirty files when `base` is `None`.
pub fn changed_files(repo_root: &Path, base: Option<&str>) -> Result<Vec<String>> {
    let out = match base {
        Some(base) => run_git_ok(repo_root, &["diff", "--name-only", base])?,
        None => {
            let status = run_git_ok(repo_root, &["status", "--porcelain"])?;
            return Ok(status
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| l.chars().skip(3).collect())
                .collect());
        }
    };
    Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Build a [`RepoContext`] snapshot for preflight/resume.
pub fn repo_context(repo_root: &Path, run_branch: &str) -> Result<RepoContext> {
    Ok(RepoContext {
        git_root: git_root(repo_root)?,
        current_branch: current_branch(repo_root)?,
        run_branch: run_branch.to_string(),
        default_branch: default_branch(repo_root)?,
        changed_files: changed_files(repo_root, None)?,
    })
}

/// Create the checkpoint commit for one milestone. Stages everything
/// under `repo_root` then commits with the canonical subject.
/// Returns the new commit's full SHA.
pub fn create_checkpoint_commit(repo_root: &Path, run_id: &RunId, milestone_index: u64) -> Result<String> {
    run_git_ok(repo_root, &["add", "-A"])?;
    let subject = checkpoint_subject(run_id, milestone_index);
    let out = run_git(repo_root, &["commit", "-m", &subject])?;
    if !out.status.success() {
        bail!("git commit failed: {}", String::from_utf8_lossy(&out.stderr));
    }
    run_git_ok(repo_root, &["rev-parse", "HEAD"])
}

pub fn checkpoint_subject(run_id: &RunId, milestone_index: u64) -> String {
    CHECKPOINT_SUBJECT_FMT
        .replace("{run_id}", run_id.as_str())
        .replace("{n}", &milestone_index.to_string())
}

fn checkpoint_subject_regex(run_id: &RunId) -> Regex {
    let escaped = regex::escape(run_id.as_str());
    Regex::new(&format!(r"^chore\(runr\): checkpoint {escaped} milestone (\d+)$")).expect("valid regex")
}

fn legacy_checkpoint_subject_regex() -> Regex {
    Regex::new(r"^chore\(agent\): checkpoint milestone (\d+)$").expect("valid regex")
}

/// Scan `git log` for the last checkpoint commit for `run_id`, preferring
/// the run-specific subject and falling back to the legacy subject only
/// when no run-specific match exists. The legacy fallback is read-only:
/// this crate never writes a legacy-format commit itself.
pub fn find_last_checkpoint(repo_root: &Path, run_id: &RunId) -> Result<CheckpointInfo> {
    let log = run_git_ok(repo_root, &["log", "--format=%H%x09%s"])?;
    let run_specific = checkpoint_subject_regex(run_id);
    let legacy = legacy_checkpoint_subject_regex();

    for line in log.lines() {
        let Some((sha, subject)) = line.split_once('\t') else { continue };
        if let Some(caps) = run_specific.captures(subject) {
            let n: i64 = caps[1].parse().unwrap_or(0);
            return Ok(CheckpointInfo { sha: Some(sha.to_string()), milestone_index: n, source: CheckpointSource::RunSpecific });
        }
    }
    for line in log.lines() {
        let Some((sha, subject)) = line.split_once('\t') else { continue };
        if let Some(caps) = legacy.captures(subject) {
            let n: i64 = caps[1].parse().unwrap_or(0);
            return Ok(CheckpointInfo { sha: Some(sha.to_string()), milestone_index: n, source: CheckpointSource::Legacy });
        }
    }
    Ok(CheckpointInfo { sha: None, milestone_index: -1, source: CheckpointSource::None })
}

/// `git diff --stat` between a checkpoint SHA and the working tree, used
/// to populate the resume `ResumePlan.delta`.
pub fn diffstat_since(repo_root: &Path, sha: &str) -> Option<String> {
    run_git_ok(repo_root, &["diff", "--stat", sha]).ok().filter(|s| !s.is_empty())
}

/// Create a deterministically-named stash (`runr-auto-<run_id>`) and
/// return `(stash_ref, file_count)`.
pub fn create_auto_stash(repo_root: &Path, run_id: &RunId) -> Result<(String, usize)> {
    let dirty = changed_files(repo_root, None)?;
    let label = format!("runr-auto-{}", run_id.as_str());
    run_git_ok(repo_root, &["stash", "push", "--include-untracked", "-m", &label])?;
    let stash_ref = run_git_ok(repo_root, &["stash", "list", "--format=%gd %s"])?
        .lines()
        .find(|l| l.contains(&label))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("stash@{0}")
        .to_string();
    Ok((stash_ref, dirty.len()))
}

/// Worktree layout: `<repo>/.agent-worktrees/<run_id>`.
pub fn worktree_path(repo_root: &Path, run_id: &RunId) -> PathBuf {
    repo_root.join(".agent-worktrees").join(run_id.as_str())
}

pub fn worktree_exists(repo_root: &Path, run_id: &RunId) -> bool {
    worktree_path(repo_root, run_id).is_dir()
}

/// Create a worktree for `run_id` checked out at `branch`, rooted at
/// `base_sha`. Uses `--force` when a stale worktree directory is already
/// registered.
pub fn create_worktree(repo_root: &Path, run_id: &RunId, branch: &str, base_sha: &str, force: bool) -> Result<PathBuf> {
    let path = worktree_path(repo_root, run_id);
    let mut args = vec!["worktree", "add"];
    if force {
        args.push("--force");
    }
    let path_str = path.to_string_lossy().to_string();
    args.push(&path_str);
    args.push(branch);
    let _ = run_git(repo_root, &["branch", branch, base_sha]);
    run_git_ok(repo_root, &args)?;
    Ok(path)
}

/// Confirm a worktree's current HEAD still matches `base_sha`.
pub fn worktree_base_matches(worktree_root: &Path, base_sha: &str) -> Result<bool> {
    let head = run_git_ok(worktree_root, &["rev-parse", "HEAD"])?;
    Ok(head == base_sha || head.starts_with(base_sha))
}
