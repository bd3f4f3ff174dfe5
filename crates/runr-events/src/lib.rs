//! Append-only JSONL event log for `runr` runs.
//!
//! This crate owns exactly two files per run directory: `timeline.jsonl`
//! (one [`Event`] per line, append-only) and `seq.txt` (an ASCII integer,
//! the last allocated sequence number). [`EventLog::append`] is the only
//! write path; there is no update or delete.
//!
//! ## Durability discipline
//!
//! The event line is written and flushed *before* `seq.txt` is updated.
//! If the process crashes between those two writes, `seq.txt` under-counts
//! relative to the timeline. The next [`EventLog::append`] call does not
//! trust `seq.txt` alone: it also inspects the last line already on disk
//! and allocates `max(seq_file, last_line_seq) + 1`, so sequence numbers
//! stay strictly increasing and gap-free even across a crash.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use runr_types::{Event, EventSource, EventType};

pub const TIMELINE_FILE: &str = "timeline.jsonl";
pub const SEQ_FILE: &str = "seq.txt";

pub fn timeline_path(run_dir: &Path) -> PathBuf {
    run_dir.join(TIMELINE_FILE)
}

pub fn seq_path(run_dir: &Path) -> PathBuf {
    run_dir.join(SEQ_FILE)
}

/// Handle onto one run directory's event log.
pub struct EventLog {
    run_dir: PathBuf,
}

impl EventLog {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self { run_dir: run_dir.into() }
    }

    /// Create the timeline/seq files if absent. Idempotent.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.run_dir)
            .with_context(|| format!("creating run dir {}", self.run_dir.display()))?;
        let timeline = timeline_path(&self.run_dir);
        if !timeline.exists() {
            File::create(&timeline).with_context(|| format!("creating {}", timeline.display()))?;
        }
        let seq = seq_path(&self.run_dir);
        if !seq.exists() {
            write_seq_atomic(&seq, 0)?;
        }
        Ok(())
    }

    /// Allocate the next sequence number, stamp a timestamp, append one
    /// JSON line, then persist the new sequence counter. Returns the
    /// fully-populated [`Event`].
    pub fn append(
        &self,
        event_type: EventType,
        source: EventSource,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let next_seq = self.allocate_next_seq()?;
        let event = Event {
            seq: next_seq,
            timestamp: Utc::now(),
            event_type,
            source,
            payload,
        };
        self.append_line(&event)?;
        write_seq_atomic(&seq_path(&self.run_dir), next_seq)?;
        Ok(event)
    }

    fn allocate_next_seq(&self) -> Result<u64> {
        let from_counter = read_seq(&seq_path(&self.run_dir))?;
        let from_timeline = self.last_line_seq()?.unwrap_or(0);
        Ok(from_counter.max(from_timeline) + 1)
    }

    fn last_line_seq(&self) -> Result<Option<u64>> {
        let path = timeline_path(&self.run_dir);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut last: Option<u64> = None;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A torn final write (crash mid-line) is not valid JSON; skip it
            // rather than fail the whole read -- it was never durable.
            if let Ok(event) = serde_json::from_str::<Event>(&line) {
                last = Some(event.seq);
            }
        }
        Ok(last)
    }

    fn append_line(&self, event: &Event) -> Result<()> {
        let path = timeline_path(&self.run_dir);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {} for append", path.display()))?;
        let line = serde_json::to_string(event).context("serializing event")?;
        writeln!(file, "{line}").with_context(|| format!("appending to {}", path.display()))?;
        file.flush().context("flushing event log")?;
        file.sync_data().ok();
        Ok(())
    }

    /// Read every durable event in timeline order. Torn trailing lines
    /// from a crash mid-write are silently skipped, matching
    /// [`Self::last_line_seq`].
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let path = timeline_path(&self.run_dir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn read_seq(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(raw.trim().parse().unwrap_or(0))
}

fn write_seq_atomic(path: &Path, value: u64) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, value.to_string()).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
