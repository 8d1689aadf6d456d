//! Contamination Guard Filter — veto rules that stop short ambiguous tokens
//! from being learned outside their safe contexts.
//!
//! The filter is consulted last, as a veto over an otherwise-positive
//! decision. It can only turn an approval into a rejection, never the reverse.

use std::collections::HashSet;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a guard's `pattern` is matched against the normalized candidate text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPattern {
    /// Case-insensitive whole-string equality.
    Exact(String),
    /// Case-insensitive regex over the whole normalized text.
    Regex(String),
}

/// A named veto rule. If `pattern` matches the candidate, the context decides:
/// a blocked domain is a hard veto, an allowed context passes, anything the
/// guard does not recognize is treated as a veto too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContaminationGuard {
    pub name: String,
    pub pattern: GuardPattern,
    pub allowed_contexts: HashSet<String>,
    pub blocked_domains: HashSet<String>,
    pub severity: u8,
}

/// Outcome of running a candidate through the guard list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardVerdict {
    pub allowed: bool,
    pub fired_guard: Option<String>,
}

impl GuardVerdict {
    fn allow() -> Self {
        GuardVerdict {
            allowed: true,
            fired_guard: None,
        }
    }

    fn veto(guard: &ContaminationGuard) -> Self {
        GuardVerdict {
            allowed: false,
            fired_guard: Some(guard.name.clone()),
        }
    }
}

/// Holds the guard list in its fixed evaluation order: severity descending,
/// insertion order for ties.
pub struct GuardFilter {
    guards: Vec<ContaminationGuard>,
}

impl GuardFilter {
    pub fn new(mut guards: Vec<ContaminationGuard>) -> Self {
        // Stable sort keeps insertion order within equal severities.
        guards.sort_by(|a, b| b.severity.cmp(&a.severity));
        GuardFilter { guards }
    }

    /// Evaluates `candidate_text` (normalized) observed in `context`.
    ///
    /// For the first guard whose pattern matches: a blocked context is a hard
    /// veto and short-circuits the rest; an unrecognized context also vetoes
    /// (guards only explicitly permit contexts they know). A recognized
    /// allowed context lets evaluation continue to the next guard. No match
    /// anywhere means the candidate is allowed.
    pub fn evaluate(&self, candidate_text: &str, context: &str) -> GuardVerdict {
        for guard in &self.guards {
            if !matches_pattern(guard, candidate_text) {
                continue;
            }
            if guard.blocked_domains.contains(context) {
                return GuardVerdict::veto(guard);
            }
            if !guard.allowed_contexts.contains(context) {
                return GuardVerdict::veto(guard);
            }
        }
        GuardVerdict::allow()
    }
}

/// A pattern that cannot be evaluated fails closed: a missed contamination
/// costs more than a missed auto-approval, and a Pending candidate can still
/// be approved on a later pass.
fn matches_pattern(guard: &ContaminationGuard, text: &str) -> bool {
    match &guard.pattern {
        GuardPattern::Exact(expected) => text.eq_ignore_ascii_case(expected),
        GuardPattern::Regex(pattern) => {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(text),
                Err(e) => {
                    warn!("Guard '{}' has unusable pattern ({e}); failing closed", guard.name);
                    true
                }
            }
        }
    }
}

fn set_of(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in guards for single-letter and short language names that collide
/// with ordinary prose outside programming/statistics contexts.
pub fn default_guards() -> Vec<ContaminationGuard> {
    vec![
        ContaminationGuard {
            name: "single-letter-language".to_string(),
            pattern: GuardPattern::Regex("^[rc]$".to_string()),
            allowed_contexts: set_of(&["programming", "statistical", "data_science"]),
            blocked_domains: set_of(&["general", "soft_skills", "languages"]),
            severity: 10,
        },
        ContaminationGuard {
            name: "go-language".to_string(),
            pattern: GuardPattern::Exact("go".to_string()),
            allowed_contexts: set_of(&["programming", "backend"]),
            blocked_domains: set_of(&["general", "soft_skills"]),
            severity: 8,
        },
        ContaminationGuard {
            name: "sas-ambiguous".to_string(),
            pattern: GuardPattern::Exact("sas".to_string()),
            allowed_contexts: set_of(&["programming", "statistical", "data_science"]),
            blocked_domains: set_of(&["general", "aviation"]),
            severity: 5,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(name: &str, pattern: GuardPattern, allowed: &[&str], blocked: &[&str], severity: u8) -> ContaminationGuard {
        ContaminationGuard {
            name: name.to_string(),
            pattern,
            allowed_contexts: set_of(allowed),
            blocked_domains: set_of(blocked),
            severity,
        }
    }

    #[test]
    fn test_blocked_domain_is_hard_veto() {
        let filter = GuardFilter::new(vec![guard(
            "r-guard",
            GuardPattern::Regex("^R$".to_string()),
            &["programming", "statistical"],
            &["general"],
            10,
        )]);
        let verdict = filter.evaluate("r", "general");
        assert!(!verdict.allowed);
        assert_eq!(verdict.fired_guard.as_deref(), Some("r-guard"));
    }

    #[test]
    fn test_allowed_context_passes() {
        let filter = GuardFilter::new(default_guards());
        assert!(filter.evaluate("r", "programming").allowed);
        assert!(filter.evaluate("go", "backend").allowed);
    }

    #[test]
    fn test_unknown_context_is_not_free_passed() {
        let filter = GuardFilter::new(default_guards());
        // "marketing" is neither allowed nor blocked for the R guard.
        let verdict = filter.evaluate("r", "marketing");
        assert!(!verdict.allowed);
    }

    #[test]
    fn test_no_matching_guard_allows() {
        let filter = GuardFilter::new(default_guards());
        assert!(filter.evaluate("kubernetes", "general").allowed);
    }

    #[test]
    fn test_pattern_is_case_insensitive() {
        let filter = GuardFilter::new(vec![guard(
            "go",
            GuardPattern::Exact("go".to_string()),
            &["programming"],
            &["general"],
            1,
        )]);
        assert!(!filter.evaluate("GO", "general").allowed);
    }

    #[test]
    fn test_higher_severity_evaluated_first() {
        // Both match "sas"; the severity-10 guard blocks "general" first.
        let filter = GuardFilter::new(vec![
            guard(
                "low",
                GuardPattern::Exact("sas".to_string()),
                &["general"],
                &[],
                1,
            ),
            guard(
                "high",
                GuardPattern::Exact("sas".to_string()),
                &["statistical"],
                &["general"],
                10,
            ),
        ]);
        let verdict = filter.evaluate("sas", "general");
        assert!(!verdict.allowed);
        assert_eq!(verdict.fired_guard.as_deref(), Some("high"));
    }

    #[test]
    fn test_insertion_order_breaks_severity_ties() {
        let filter = GuardFilter::new(vec![
            guard("first", GuardPattern::Exact("x".to_string()), &[], &["general"], 5),
            guard("second", GuardPattern::Exact("x".to_string()), &[], &["general"], 5),
        ]);
        assert_eq!(
            filter.evaluate("x", "general").fired_guard.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_malformed_regex_fails_closed() {
        let filter = GuardFilter::new(vec![guard(
            "broken",
            GuardPattern::Regex("([unclosed".to_string()),
            &["programming"],
            &[],
            1,
        )]);
        // Pattern cannot compile, so the guard is treated as matching, and
        // the unknown context vetoes.
        assert!(!filter.evaluate("anything", "general").allowed);
        // A recognized allowed context still passes the broken guard.
        assert!(filter.evaluate("anything", "programming").allowed);
    }

    #[test]
    fn test_scenario_single_letter_r_in_general() {
        // "R" observed in general prose must be vetoed no matter how strong
        // the other signals are.
        let filter = GuardFilter::new(vec![guard(
            "r",
            GuardPattern::Regex("^R$".to_string()),
            &["programming", "statistical"],
            &["general"],
            10,
        )]);
        assert!(!filter.evaluate("r", "general").allowed);
    }
}
