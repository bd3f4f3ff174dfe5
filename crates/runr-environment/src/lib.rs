//! Environment fingerprint capture and drift detection.
//!
//! Captured at run start, re-captured on resume, and compared field-by-field
//! via [`runr_types::Fingerprint::diff`]. Uses an open-ended
//! `key_tool_versions[]` + `lockfile_hashes{}` + `config_hash` shape rather
//! than a fixed set of tracked fields.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use runr_types::Fingerprint;
use sha2::{Digest, Sha256};

/// Tool probes run at fingerprint-capture time: `(display name, argv)`.
/// Missing tools are simply omitted from `key_tool_versions` rather than
/// failing the capture -- a worker's toolchain is inherently variable.
const TOOL_PROBES: &[(&str, &[&str])] = &[
    ("git", &["git", "--version"]),
    ("node", &["node", "--version"]),
    ("python", &["python3", "--version"]),
    ("cargo", &["cargo", "--version"]),
];

/// Well-known lockfile basenames hashed into `lockfile_hashes` when present
/// in the repo root. Feeds `delta.lockfiles_changed` on resume.
const LOCKFILE_NAMES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "poetry.lock",
];

fn probe_version(argv: &[&str]) -> Option<String> {
    let output = std::process::Command::new(argv[0]).args(&argv[1..]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let text = if text.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        text.to_string()
    };
    Some(text.trim().to_string())
}

fn hash_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

/// Runtime identity: we run on the Rust toolchain itself, so this reports
/// the invoking process's own `rustc`/`cargo` pairing rather than a worker
/// language runtime (workers report their own versions via
/// `key_tool_versions`).
fn runtime_version() -> String {
    probe_version(&["rustc", "--version"]).unwrap_or_else(|| "unknown".to_string())
}

/// Hash the supervisor's effective config so a config edit across a resume
/// boundary surfaces as a fingerprint mismatch.
pub fn config_hash(config_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_bytes);
    hex::encode(hasher.finalize())
}

/// Capture the current environment fingerprint, probing tool versions and
/// hashing any lockfiles present at `repo_root`.
pub fn capture(repo_root: &Path, config_bytes: &[u8]) -> Result<Fingerprint> {
    let mut key_tool_versions = BTreeMap::new();
    for (name, argv) in TOOL_PROBES {
        if let Some(version) = probe_version(argv) {
            key_tool_versions.insert((*name).to_string(), version);
        }
    }

    let mut lockfile_hashes = BTreeMap::new();
    for name in LOCKFILE_NAMES {
        let path = repo_root.join(name);
        if let Some(hash) = hash_file(&path) {
            lockfile_hashes.insert((*name).to_string(), hash);
        }
    }

    Ok(Fingerprint {
        runtime_version: runtime_version(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        key_tool_versions,
        config_hash: config_hash(config_bytes),
        lockfile_hashes,
    })
}
