//! `ScopeGuard`: glob-based allow/deny checks, lockfile enforcement, and the
//! pattern-overlap primitive shared by the collision/ownership layer.
//!
//! Glob semantics are POSIX-style: `*` matches within one path segment,
//! `**` crosses segment boundaries, `?` matches one character, `[...]` is a
//! character class. Paths are normalized to forward slashes before
//! matching; matching is case-sensitive.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Normalize a path to forward slashes, matching every other caller of
/// patterns in this crate.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Result of a scope or lockfile check: either clean, or the list of
/// offending files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeCheck {
    pub ok: bool,
    pub violations: Vec<String>,
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let normalized = normalize_path(pattern);
        if let Ok(glob) = compile_glob(&normalized) {
            builder.add(glob);
        }
    }
    // An unparseable pattern is dropped rather than failing the whole
    // check: a typo'd glob should never silently open the allowlist to
    // everything, and `build()` on an empty builder matches nothing.
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(false)
        .build()
}

/// A file is permitted iff it matches at least one allow pattern AND no
/// deny pattern. An empty allowlist matches no files.
pub fn check_scope(changed: &[String], allow: &[String], deny: &[String]) -> ScopeCheck {
    let allow_set = build_globset(allow);
    let deny_set = build_globset(deny);
    let mut violations = Vec::new();
    for file in changed {
        let normalized = normalize_path(file);
        let allowed = !allow.is_empty() && allow_set.is_match(&normalized);
        let denied = !deny.is_empty() && deny_set.is_match(&normalized);
        if !allowed || denied {
            violations.push(file.clone());
        }
    }
    ScopeCheck { ok: violations.is_empty(), violations }
}

/// Any changed file matching a lockfile pattern is a violation unless
/// `allow_deps` is true.
pub fn check_lockfiles(changed: &[String], lockfiles: &[String], allow_deps: bool) -> ScopeCheck {
    if allow_deps || lockfiles.is_empty() {
        return ScopeCheck { ok: true, violations: Vec::new() };
    }
    let lockfile_set = build_globset(lockfiles);
    let violations: Vec<String> = changed
        .iter()
        .filter(|f| lockfile_set.is_match(normalize_path(f)))
        .cloned()
        .collect();
    ScopeCheck { ok: violations.is_empty(), violations }
}

/// The literal (non-wildcard) directory prefix of a normalized pattern,
/// i.e. the path segments up to but excluding the first segment that
/// contains a glob metacharacter.
fn literal_prefix_dir(pattern: &str) -> String {
    pattern
        .split('/')
        .take_while(|segment| !segment.contains(['*', '?', '[']))
        .collect::<Vec<_>>()
        .join("/")
}

/// Conservative, decidable overlap check: two patterns overlap
/// iff there exists some path both would match. We approximate this with
/// a prefix-directory comparison, which is sound in the direction that
/// matters for collision detection -- it never misses a real overlap, and
/// only over-reports for patterns whose literal prefixes happen to share a
/// directory without actually sharing matched files -- an acceptable
/// false-positive for a conservative, decidable check.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a == b {
        return true;
    }
    let pa = literal_prefix_dir(&a);
    let pb = literal_prefix_dir(&b);
    pa.starts_with(&pb) || pb.starts_with(&pa)
}

/// True if any pattern in `a` overlaps any pattern in `b` (used by both
/// the allowlist pre-check and the ownership-claim book).
pub fn any_overlap(a: &[String], b: &[String]) -> Option<(String, String)> {
    for pa in a {
        for pb in b {
            if patterns_overlap(pa, pb) {
                return Some((pa.clone(), pb.clone()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_one_segment_only() {
        let set = build_globset(&["src/*.ts".to_string()]);
        assert!(set.is_match("src/a.ts"));
        assert!(!set.is_match("src/nested/a.ts"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let set = build_globset(&["src/**".to_string()]);
        assert!(set.is_match("src/a.ts"));
        assert!(set.is_match("src/nested/deep/a.ts"));
    }

    #[test]
    fn check_scope_allows_files_matching_allow_not_deny() {
        let changed = vec!["src/a.ts".to_string(), ".env".to_string()];
        let allow = vec!["src/**".to_string()];
        let deny = vec![".env".to_string()];
        let result = check_scope(&changed, &allow, &deny);
        assert!(!result.ok);
        assert_eq!(result.violations, vec![".env".to_string()]);
    }

    #[test]
    fn check_scope_empty_allowlist_matches_nothing() {
        let changed = vec!["src/a.ts".to_string()];
        let result = check_scope(&changed, &[], &[]);
        assert!(!result.ok);
        assert_eq!(result.violations, vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn check_lockfiles_blocks_unless_allow_deps() {
        let changed = vec!["Cargo.lock".to_string(), "src/a.rs".to_string()];
        let lockfiles = vec!["*.lock".to_string(), "package-lock.json".to_string()];
        let blocked = check_lockfiles(&changed, &lockfiles, false);
        assert!(!blocked.ok);
        assert_eq!(blocked.violations, vec!["Cargo.lock".to_string()]);

        let allowed = check_lockfiles(&changed, &lockfiles, true);
        assert!(allowed.ok);
    }

    #[test]
    fn patterns_overlap_detects_nested_allowlists() {
        assert!(patterns_overlap("src/api/**", "src/**"));
        assert!(patterns_overlap("src/**", "src/api/**"));
        assert!(!patterns_overlap(".env", "src/**"));
    }

    #[test]
    fn patterns_overlap_is_reflexive_for_identical_patterns() {
        assert!(patterns_overlap("src/**", "src/**"));
    }

    #[test]
    fn any_overlap_finds_first_colliding_pair() {
        let a = vec!["docs/**".to_string(), "src/api/**".to_string()];
        let b = vec!["src/**".to_string()];
        let found = any_overlap(&a, &b);
        assert_eq!(found, Some(("src/api/**".to_string(), "src/**".to_string())));
    }

    proptest::proptest! {
        #[test]
        fn patterns_overlap_is_symmetric(a in "[a-z/]{1,20}", b in "[a-z/]{1,20}") {
            proptest::prop_assert_eq!(patterns_overlap(&a, &b), patterns_overlap(&b, &a));
        }
    }
}
