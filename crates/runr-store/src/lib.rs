//! `RunStore`: the durable per-run event log, state snapshot, and artifact
//! directory for a single run.
//!
//! ```text
//! <repo>/.agent/runs/<run_id>/
//!   state.json
//!   config.snapshot.json
//!   fingerprint.json
//!   timeline.jsonl          # owned by runr-events
//!   seq.txt                 # owned by runr-events
//!   summary.md
//!   artifacts/
//!   handoffs/
//! ```
//!
//! `RunStore` owns everything under a run's directory exclusively. Nothing
//! outside this crate writes to it directly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use runr_events::EventLog;
use runr_types::{Event, EventSource, EventType, Fingerprint, RunId, RunState};

pub const RUNS_DIR: &str = ".agent/runs";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const HANDOFFS_DIR: &str = "handoffs";
pub const STATE_FILE: &str = "state.json";
pub const CONFIG_SNAPSHOT_FILE: &str = "config.snapshot.json";
pub const FINGERPRINT_FILE: &str = "fingerprint.json";
pub const SUMMARY_FILE: &str = "summary.md";

/// Resolve a run's directory under `<repo>/.agent/runs/<run_id>`.
pub fn run_dir(repo_root: &Path, run_id: &RunId) -> PathBuf {
    repo_root.join(RUNS_DIR).join(run_id.as_str())
}

/// Write `value` as pretty JSON to `path` via write-temp-then-rename, so a
/// crash mid-write never leaves a half-written file in place.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).context("serializing snapshot")?;
    fs::write(&tmp, &bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Read and deserialize JSON from `path`, or `Ok(None)` if it does not
/// exist.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Handle onto one run's directory tree.
pub struct RunStore {
    dir: PathBuf,
    events: EventLog,
}

impl RunStore {
    pub fn open(repo_root: &Path, run_id: &RunId) -> Self {
        let dir = run_dir(repo_root, run_id);
        let events = EventLog::new(&dir);
        Self { dir, events }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(ARTIFACTS_DIR)
    }

    pub fn handoffs_dir(&self) -> PathBuf {
        self.dir.join(HANDOFFS_DIR)
    }

    /// Idempotently create the run directory tree. No failure if present.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.artifacts_dir())
            .with_context(|| format!("creating {}", self.artifacts_dir().display()))?;
        fs::create_dir_all(self.handoffs_dir())
            .with_context(|| format!("creating {}", self.handoffs_dir().display()))?;
        self.events.init()
    }

    /// Append one event. Fails only on I/O error; callers treat I/O
    /// failure as fatal.
    pub fn append_event(
        &self,
        event_type: EventType,
        source: EventSource,
        payload: serde_json::Value,
    ) -> Result<Event> {
        self.events.append(event_type, source, payload)
    }

    /// Fold the full timeline in order. Used by resume and by anything
    /// that must not trust the snapshot alone.
    pub fn read_timeline(&self) -> Result<Vec<Event>> {
        self.events.read_all()
    }

    pub fn read_state(&self) -> Result<Option<RunState>> {
        read_json(&self.dir.join(STATE_FILE))
    }

    pub fn write_state(&self, state: &RunState) -> Result<()> {
        atomic_write_json(&self.dir.join(STATE_FILE), state)
    }

    pub fn read_fingerprint(&self) -> Result<Option<Fingerprint>> {
        read_json(&self.dir.join(FINGERPRINT_FILE))
    }

    pub fn write_fingerprint(&self, fingerprint: &Fingerprint) -> Result<()> {
        atomic_write_json(&self.dir.join(FINGERPRINT_FILE), fingerprint)
    }

    pub fn write_config_snapshot<T: serde::Serialize>(&self, config: &T) -> Result<()> {
        atomic_write_json(&self.dir.join(CONFIG_SNAPSHOT_FILE), config)
    }

    pub fn read_config_snapshot<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>> {
        read_json(&self.dir.join(CONFIG_SNAPSHOT_FILE))
    }

    pub fn write_summary(&self, markdown: &str) -> Result<()> {
        let path = self.dir.join(SUMMARY_FILE);
        fs::write(&path, markdown).with_context(|| format!("writing {}", path.display()))
    }

    /// Blob under `artifacts/<name>` (task text, plan, worker transcripts,
    /// verify logs, config snapshot, environment fingerprint).
    pub fn write_artifact(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        write_blob(&self.artifacts_dir(), name, bytes)
    }

    pub fn read_artifact(&self, name: &str) -> Result<Option<Vec<u8>>> {
        read_blob(&self.artifacts_dir(), name)
    }

    /// Blob under `handoffs/<name>` (continuation memos presented to
    /// workers across a resume boundary).
    pub fn write_memo(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        write_blob(&self.handoffs_dir(), name, bytes)
    }

    pub fn read_memo(&self, name: &str) -> Result<Option<Vec<u8>>> {
        read_blob(&self.handoffs_dir(), name)
    }
}

fn write_blob(base: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = base.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn read_blob(base: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let path = base.join(name);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(fs::read(&path).with_context(|| format!("reading {}", path.display()))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use runr_types::{Milestone, RiskLevel};
    use tempfile::tempdir;

    fn sample_state(run_id: RunId) -> RunState {
        RunState::new(
            run_id,
            PathBuf::from("/repo"),
            vec![Milestone { name: "m1".into(), risk_level: RiskLevel::Low, files_expected: None }],
            "runr/run".into(),
        )
    }

    #[test]
    fn init_creates_expected_tree() {
        let repo = tempdir().unwrap();
        let run_id = RunId("20260101000000-aaaa".into());
        let store = RunStore::open(repo.path(), &run_id);
        store.init().unwrap();
        assert!(store.artifacts_dir().is_dir());
        assert!(store.handoffs_dir().is_dir());
        assert!(runr_events::timeline_path(store.dir()).exists());
        // idempotent
        store.init().unwrap();
    }

    #[test]
    fn state_roundtrips_through_atomic_write() {
        let repo = tempdir().unwrap();
        let run_id = RunId("20260101000000-bbbb".into());
        let store = RunStore::open(repo.path(), &run_id);
        store.init().unwrap();
        let state = sample_state(run_id.clone());
        store.write_state(&state).unwrap();
        let loaded = store.read_state().unwrap().expect("state present");
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.milestones.len(), 1);
    }

    #[test]
    fn read_state_before_write_is_none() {
        let repo = tempdir().unwrap();
        let run_id = RunId("20260101000000-cccc".into());
        let store = RunStore::open(repo.path(), &run_id);
        store.init().unwrap();
        assert!(store.read_state().unwrap().is_none());
    }

    #[test]
    fn artifacts_and_memos_write_under_their_own_subdirectories() {
        let repo = tempdir().unwrap();
        let run_id = RunId("20260101000000-dddd".into());
        let store = RunStore::open(repo.path(), &run_id);
        store.init().unwrap();
        store.write_artifact("plan_1.json", b"{}").unwrap();
        store.write_memo("continue/2026/continue.json", b"{}").unwrap();
        assert_eq!(store.read_artifact("plan_1.json").unwrap().unwrap(), b"{}");
        assert_eq!(store.read_memo("continue/2026/continue.json").unwrap().unwrap(), b"{}");
        assert!(store.read_artifact("missing.json").unwrap().is_none());
    }

    #[test]
    fn events_appended_through_store_are_visible_in_timeline() {
        let repo = tempdir().unwrap();
        let run_id = RunId("20260101000000-eeee".into());
        let store = RunStore::open(repo.path(), &run_id);
        store.init().unwrap();
        store
            .append_event(EventType::run_started(), EventSource::Cli, serde_json::json!({}))
            .unwrap();
        store
            .append_event(EventType::stop(), EventSource::Supervisor, serde_json::json!({"reason":"complete"}))
            .unwrap();
        let events = store.read_timeline().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
    }
}
