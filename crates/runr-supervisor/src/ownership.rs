//! Ownership and collision: two layers guarding the shared
//! working tree across concurrent tracks, plus the deadlock tiebreak that
//! makes serialize-policy waits always resolve.

use runr_scope::any_overlap;
use runr_types::{CollisionPolicy, OwnershipClaim, RunId};

/// Outcome of an allowlist pre-check against currently active runs (layer
/// 1 of the ownership model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistCheck {
    Clear,
    /// Overlapping patterns found, but policy tolerates it (serialize
    /// warns and proceeds anyway; force ignores it outright).
    Warning { overlaps: Vec<(String, String)> },
    /// Overlap found and policy is `fail`.
    Blocked { overlaps: Vec<(String, String)> },
}

/// Compare a candidate allowlist against every active run's allowlist.
pub fn check_allowlist_overlap(
    candidate: &[String],
    active_allowlists: &[Vec<String>],
    policy: CollisionPolicy,
) -> AllowlistCheck {
    let mut overlaps = Vec::new();
    for active in active_allowlists {
        if let Some(pair) = any_overlap(candidate, active) {
            overlaps.push(pair);
        }
    }
    if overlaps.is_empty() {
        return AllowlistCheck::Clear;
    }
    match policy {
        CollisionPolicy::Force => AllowlistCheck::Clear,
        CollisionPolicy::Fail => AllowlistCheck::Blocked { overlaps },
        CollisionPolicy::Serialize => AllowlistCheck::Warning { overlaps },
    }
}

/// Process-local ledger of reserved ownership patterns (layer 2 of the
/// ownership model: a process-local allocation ledger). Exclusively owned
/// by one orchestrator for the lifetime of that orchestration.
#[derive(Debug, Clone, Default)]
pub struct ClaimBook {
    claims: Vec<OwnershipClaim>,
}

/// Why a claim reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConflict {
    pub claimant_track_id: String,
    pub conflicting_track_id: String,
    pub pattern_a: String,
    pub pattern_b: String,
}

impl ClaimBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claims(&self) -> &[OwnershipClaim] {
        &self.claims
    }

    /// Try to reserve `owns_normalized` for `track_id`. Fails (without
    /// mutating the book) on overlap with any claim held by a *different*
    /// track.
    pub fn reserve(
        &mut self,
        track_id: &str,
        run_id: Option<RunId>,
        owns_raw: Vec<String>,
        owns_normalized: Vec<String>,
    ) -> Result<(), ClaimConflict> {
        for existing in &self.claims {
            if existing.track_id == track_id {
                continue;
            }
            if let Some((pattern_a, pattern_b)) = any_overlap(&owns_normalized, &existing.owns_normalized) {
                return Err(ClaimConflict {
                    claimant_track_id: track_id.to_string(),
                    conflicting_track_id: existing.track_id.clone(),
                    pattern_a,
                    pattern_b,
                });
            }
        }
        self.claims.push(OwnershipClaim { track_id: track_id.to_string(), run_id, owns_raw, owns_normalized });
        Ok(())
    }

    /// Release every claim held by `track_id`. Claims are released on
    /// step termination.
    pub fn release(&mut self, track_id: &str) {
        self.claims.retain(|c| c.track_id != track_id);
    }

    pub fn claim_for(&self, track_id: &str) -> Option<&OwnershipClaim> {
        self.claims.iter().find(|c| c.track_id == track_id)
    }
}

/// Deadlock tiebreak: between two runs that would mutually
/// wait under serialize policy, the one with the lexicographically larger
/// (strictly later-starting) `run_id` yields. Returns the `RunId` that
/// should yield.
pub fn deadlock_tiebreak<'a>(a: &'a RunId, b: &'a RunId) -> &'a RunId {
    if a > b { a } else { b }
}
