//! `VerificationPolicy`: maps change risk to a set of verification tiers
//!. Structurally the direct analog of a pure `effects(inputs)`
//! function: given `{changed_files, risk_level, is_milestone_end,
//! is_run_end}`, returns `(tiers, reasons)`.

use runr_scope::any_overlap;
use runr_types::{RiskLevel, Tier};
use serde::{Deserialize, Serialize};

/// Inputs to one policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct PolicyInputs<'a> {
    pub changed_files: &'a [String],
    pub risk_level: RiskLevel,
    pub is_milestone_end: bool,
    pub is_run_end: bool,
    /// Glob patterns that, if touched, force tier1 regardless of risk
    /// level (e.g. build manifests, CI config).
    pub risk_triggers: &'a [String],
}

/// Output of one policy evaluation: the selected tiers plus a
/// human-readable reason per tier, used by receipts to explain "why did
/// verify take 10 minutes?".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub tiers: Vec<Tier>,
    pub reasons: Vec<String>,
}

/// Select verification tiers for one VERIFY phase invocation.
///
/// - tier0 is always selected.
/// - tier1 is added when risk >= medium, at milestone end, or a changed
///   file matches a declared risk trigger.
/// - tier2 is added when risk is high or at run end.
pub fn select_tiers(inputs: &PolicyInputs) -> PolicyDecision {
    let mut tiers = vec![Tier::Tier0];
    let mut reasons = vec!["tier0 always runs".to_string()];

    let mut tier1 = false;
    if inputs.risk_level >= RiskLevel::Medium {
        tier1 = true;
        reasons.push(format!("risk_level={:?} >= medium", inputs.risk_level));
    }
    if inputs.is_milestone_end {
        tier1 = true;
        reasons.push("milestone end".to_string());
    }
    if let Some((trigger, _)) = any_overlap(inputs.risk_triggers, inputs.changed_files) {
        tier1 = true;
        reasons.push(format!("changed file matches risk trigger {trigger}"));
    }
    if tier1 {
        tiers.push(Tier::Tier1);
    }

    let mut tier2 = false;
    if inputs.risk_level == RiskLevel::High {
        tier2 = true;
        reasons.push("risk_level=high".to_string());
    }
    if inputs.is_run_end {
        tier2 = true;
        reasons.push("run end".to_string());
    }
    if tier2 {
        tiers.push(Tier::Tier2);
    }

    PolicyDecision { tiers, reasons }
}
