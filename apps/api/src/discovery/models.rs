use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

/// Maximum source contexts retained per candidate. Oldest evicted first.
pub const MAX_SOURCE_CONTEXTS: usize = 10;

/// Why a candidate was auto-promoted into the canonical dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    Taxonomy,
    Similarity,
    FrequencyAndClassifier,
    DomainPattern,
}

impl ApprovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalReason::Taxonomy => "taxonomy",
            ApprovalReason::Similarity => "similarity",
            ApprovalReason::FrequencyAndClassifier => "frequency_and_classifier",
            ApprovalReason::DomainPattern => "domain_pattern",
        }
    }

}

/// Where a candidate token was observed: document type plus a short snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    pub document_type: String,
    pub snippet: String,
}

/// One row per distinct normalized token observed outside the canonical
/// dictionary. Mutable: frequency, contexts and signals evolve with every
/// observation. Terminal for decision purposes once `auto_approved` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SkillCandidate {
    pub id: Uuid,
    pub raw_text: String,
    /// Lower-cased, whitespace-collapsed form. The identity key.
    pub normalized_text: String,
    pub frequency: i64,
    pub taxonomy_validated: bool,
    pub taxonomy_id: Option<String>,
    pub taxonomy_category: Option<String>,
    pub classifier_confidence: Option<f64>,
    pub classifier_category: Option<String>,
    pub similarity_score: Option<f64>,
    pub similar_to_skill: Option<String>,
    pub similarity_category: Option<String>,
    pub auto_approved: bool,
    pub approval_reason: Option<String>,
    pub approval_confidence: Option<f64>,
    pub category_suggestion: Option<String>,
    pub source_contexts: serde_json::Value,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl SkillCandidate {
    pub fn contexts(&self) -> Vec<SourceContext> {
        serde_json::from_value(self.source_contexts.clone()).unwrap_or_default()
    }
}

/// Result of one taxonomy lookup that found a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyMatch {
    pub id: String,
    pub category: String,
}

/// Result of one classifier pass. Confidence already clamped to [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub confidence: f64,
    pub category: String,
}

/// Best embedding-similarity match. Score already clamped to [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub skill: String,
    pub score: f64,
    pub category: String,
}

/// The three independent validation signals for a candidate. Each sub-lookup
/// is individually fallible; `None` means unavailable, not negative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signals {
    pub taxonomy: Option<TaxonomyMatch>,
    pub classifier: Option<ClassifierResult>,
    pub similarity: Option<SimilarityResult>,
}

impl Signals {
    /// JSON snapshot captured on the audit entry at promotion time.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "taxonomy": self.taxonomy,
            "classifier": self.classifier,
            "similarity": self.similarity,
        })
    }
}

/// Immutable audit row, one per approval event. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromotionAuditEntry {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub promoted_skill_id: Option<String>,
    pub reason: String,
    pub confidence: f64,
    pub signal_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-day rollup counters, upserted incrementally as events occur.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub discovered_count: i64,
    pub taxonomy_validated_count: i64,
    pub auto_approved_count: i64,
    pub high_frequency_count: i64,
}

/// Canonical normalization: lower-case, collapse internal whitespace, trim.
/// Two raw spellings that normalize identically are the same candidate.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Appends a context to the bounded ring, evicting the oldest past the cap.
pub fn push_source_context(contexts: &mut Vec<SourceContext>, ctx: SourceContext) {
    contexts.push(ctx);
    if contexts.len() > MAX_SOURCE_CONTEXTS {
        let overflow = contexts.len() - MAX_SOURCE_CONTEXTS;
        contexts.drain(..overflow);
    }
}
