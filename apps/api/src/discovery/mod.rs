//! Skill Discovery and Promotion Engine.
//!
//! Decides, for every skill-like token observed in ingested text that is not
//! already in the canonical dictionary, whether that token should be learned
//! into the dictionary, rejected as noise, or held for more evidence.
//!
//! Pipeline per observation: normalize → canonical-dictionary pre-check →
//! atomic upsert into the memory store → stats rollup → signal collection →
//! contamination guard verdict → decision ladder → on approval, dictionary
//! promotion plus one immutable audit row.

pub mod audit;
pub mod decision;
pub mod guards;
pub mod handlers;
pub mod models;
pub mod signals;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use audit::AuditRecorder;
use decision::{decide, Decision, DecisionConfig};
use guards::GuardFilter;
use models::{normalize_text, PromotionAuditEntry, SkillCandidate, SourceContext};
use signals::SignalCollector;
use store::{SkillStore, StoreError};

/// The canonical skill dictionary, an external collaborator. Written to only
/// on approval, at most once per candidate.
#[async_trait]
pub trait SkillDictionary: Send + Sync {
    async fn contains(&self, normalized_text: &str) -> Result<bool>;

    /// Adds the skill and returns the canonical skill id.
    async fn promote(
        &self,
        text: &str,
        category: Option<&str>,
        source_candidate_id: Uuid,
    ) -> Result<String>;
}

/// HTTP-backed dictionary client.
pub struct HttpSkillDictionary {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSkillDictionary {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct ContainsResponse {
    exists: bool,
}

#[derive(Debug, Serialize)]
struct PromoteRequest<'a> {
    text: &'a str,
    category: Option<&'a str>,
    source_candidate_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct PromoteResponse {
    skill_id: String,
}

#[async_trait]
impl SkillDictionary for HttpSkillDictionary {
    async fn contains(&self, normalized_text: &str) -> Result<bool> {
        let response: ContainsResponse = self
            .client
            .get(format!("{}/skills/contains", self.base_url))
            .query(&[("text", normalized_text)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.exists)
    }

    async fn promote(
        &self,
        text: &str,
        category: Option<&str>,
        source_candidate_id: Uuid,
    ) -> Result<String> {
        let response: PromoteResponse = self
            .client
            .post(format!("{}/skills/promote", self.base_url))
            .json(&PromoteRequest {
                text,
                category,
                source_candidate_id,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.skill_id)
    }
}

/// What happened to one observed token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ObservationOutcome {
    /// The token is already in the canonical dictionary; nothing recorded.
    AlreadyCanonical { normalized_text: String },
    /// The candidate was approved on an earlier pass. The observation still
    /// counted (frequency, contexts, stats) but the decision is terminal.
    AlreadyApproved { candidate: SkillCandidate },
    /// A full decision pass ran.
    Decided {
        candidate: SkillCandidate,
        decision: Decision,
        audit_entry: Option<PromotionAuditEntry>,
    },
}

/// Orchestrates the discovery pipeline. Safe to invoke concurrently from
/// multiple workers for different and for the same candidate text; all
/// per-candidate ordering comes from the store's atomic contract.
pub struct DiscoveryService {
    store: Arc<dyn SkillStore>,
    audit: Arc<dyn AuditRecorder>,
    collector: SignalCollector,
    guards: GuardFilter,
    dictionary: Arc<dyn SkillDictionary>,
    config: DecisionConfig,
}

impl DiscoveryService {
    pub fn new(
        store: Arc<dyn SkillStore>,
        audit: Arc<dyn AuditRecorder>,
        collector: SignalCollector,
        guards: GuardFilter,
        dictionary: Arc<dyn SkillDictionary>,
        config: DecisionConfig,
    ) -> Self {
        Self {
            store,
            audit,
            collector,
            guards,
            dictionary,
            config,
        }
    }

    /// Runs one candidate token with its source context through the full
    /// pipeline. A `Pending` outcome is always a safe fallback; only
    /// structural store/persistence failures propagate.
    pub async fn observe(
        &self,
        raw_text: &str,
        context: &str,
        document_type: &str,
        snippet: &str,
    ) -> Result<ObservationOutcome, AppError> {
        let normalized = normalize_text(raw_text);
        if normalized.is_empty() {
            return Err(AppError::Validation("empty candidate text".to_string()));
        }

        // Tokens the dictionary already knows are not candidates.
        match self.dictionary.contains(&normalized).await {
            Ok(true) => {
                return Ok(ObservationOutcome::AlreadyCanonical {
                    normalized_text: normalized,
                })
            }
            Ok(false) => {}
            Err(e) => {
                // A down dictionary must not lose the observation; treat the
                // token as non-canonical and let a later pass settle it.
                warn!("Dictionary contains-check failed for '{normalized}': {e}");
            }
        }

        let observation = self
            .store
            .upsert_observation(
                &normalized,
                raw_text,
                SourceContext {
                    document_type: document_type.to_string(),
                    snippet: snippet.to_string(),
                },
            )
            .await?;
        self.audit
            .record_observation(
                &observation.candidate,
                observation.is_new,
                observation.previous_frequency,
                self.config.freq_threshold,
            )
            .await?;

        // Terminal candidates keep accumulating frequency and contexts, but
        // the decision is never revisited (and no external signal spend).
        if observation.candidate.auto_approved {
            return Ok(ObservationOutcome::AlreadyApproved {
                candidate: observation.candidate,
            });
        }

        let signals = self.collector.collect(&normalized).await;
        let candidate = self
            .store
            .record_signals(observation.candidate.id, &signals)
            .await?;

        let verdict = self.guards.evaluate(&normalized, context);
        let decision = decide(&candidate, &signals, &verdict, &self.config);

        let (candidate, audit_entry) = match &decision {
            Decision::Approve {
                reason,
                confidence,
                category,
            } => {
                match self
                    .store
                    .mark_approved(candidate.id, *reason, *confidence, category.as_deref())
                    .await
                {
                    Ok(approved) => {
                        let skill_id = match self
                            .dictionary
                            .promote(&approved.raw_text, category.as_deref(), approved.id)
                            .await
                        {
                            Ok(id) => Some(id),
                            Err(e) => {
                                // The audit row still lands; promoted_skill_id
                                // stays unset until the dictionary recovers.
                                warn!("Dictionary promotion failed for '{normalized}': {e}");
                                None
                            }
                        };
                        let entry = self
                            .audit
                            .record_promotion(
                                &approved,
                                *reason,
                                *confidence,
                                &signals,
                                skill_id.as_deref(),
                            )
                            .await?;
                        info!(
                            "Auto-approved '{normalized}' (reason={}, confidence={confidence:.2})",
                            reason.as_str()
                        );
                        (approved, Some(entry))
                    }
                    Err(StoreError::AlreadyApproved(id)) => {
                        // A concurrent worker won the race; promotion already
                        // happened exactly once on their side.
                        warn!("Candidate {id} was approved concurrently; skipping re-promotion");
                        let candidate = self
                            .store
                            .get_by_normalized_text(&normalized)
                            .await?
                            .ok_or_else(|| AppError::NotFound(normalized.clone()))?;
                        return Ok(ObservationOutcome::AlreadyApproved { candidate });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Decision::Reject => {
                info!(
                    "Rejected '{normalized}' in context '{context}' (guard: {:?})",
                    verdict.fired_guard
                );
                (candidate, None)
            }
            Decision::Pending => (candidate, None),
        };

        Ok(ObservationOutcome::Decided {
            candidate,
            decision,
            audit_entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::audit::InMemoryAuditRecorder;
    use crate::discovery::guards::default_guards;
    use crate::discovery::models::{
        ApprovalReason, ClassifierResult, SimilarityResult, TaxonomyMatch,
    };
    use crate::discovery::signals::{ClassifierService, SimilarityService, TaxonomyService};
    use crate::discovery::store::InMemorySkillStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct StubTaxonomy(Option<TaxonomyMatch>);

    #[async_trait]
    impl TaxonomyService for StubTaxonomy {
        async fn lookup(&self, _text: &str) -> Result<Option<TaxonomyMatch>> {
            Ok(self.0.clone())
        }
    }

    struct StubClassifier(Option<ClassifierResult>);

    #[async_trait]
    impl ClassifierService for StubClassifier {
        async fn classify(&self, _text: &str) -> Result<ClassifierResult> {
            self.0
                .clone()
                .ok_or_else(|| anyhow::anyhow!("classifier unavailable"))
        }
    }

    struct StubSimilarity(Option<SimilarityResult>);

    #[async_trait]
    impl SimilarityService for StubSimilarity {
        async fn most_similar(&self, _text: &str) -> Result<Option<SimilarityResult>> {
            Ok(self.0.clone())
        }
    }

    /// Dictionary stub that records promotions and reports a fixed canonical set.
    #[derive(Default)]
    struct StubDictionary {
        canonical: HashSet<String>,
        promotions: Mutex<Vec<String>>,
        promote_calls: AtomicUsize,
    }

    #[async_trait]
    impl SkillDictionary for StubDictionary {
        async fn contains(&self, normalized_text: &str) -> Result<bool> {
            Ok(self.canonical.contains(normalized_text))
        }

        async fn promote(
            &self,
            text: &str,
            _category: Option<&str>,
            _source_candidate_id: Uuid,
        ) -> Result<String> {
            self.promote_calls.fetch_add(1, Ordering::SeqCst);
            self.promotions.lock().await.push(text.to_string());
            Ok(format!("skill-{text}"))
        }
    }

    struct Fixture {
        service: DiscoveryService,
        dictionary: Arc<StubDictionary>,
        audit: Arc<InMemoryAuditRecorder>,
    }

    fn fixture(
        taxonomy: Option<TaxonomyMatch>,
        classifier: Option<ClassifierResult>,
        similarity: Option<SimilarityResult>,
        canonical: &[&str],
    ) -> Fixture {
        let dictionary = Arc::new(StubDictionary {
            canonical: canonical.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        let audit = Arc::new(InMemoryAuditRecorder::new());
        let collector = SignalCollector::new(
            Arc::new(StubTaxonomy(taxonomy)),
            Arc::new(StubClassifier(classifier)),
            Arc::new(StubSimilarity(similarity)),
            Duration::from_millis(100),
        );
        let service = DiscoveryService::new(
            Arc::new(InMemorySkillStore::new()),
            audit.clone(),
            collector,
            GuardFilter::new(default_guards()),
            dictionary.clone(),
            DecisionConfig::default(),
        );
        Fixture {
            service,
            dictionary,
            audit,
        }
    }

    #[tokio::test]
    async fn test_canonical_token_is_skipped() {
        let f = fixture(None, None, None, &["python"]);
        let outcome = f
            .service
            .observe("Python", "programming", "resume", "wrote Python daily")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ObservationOutcome::AlreadyCanonical { normalized_text } if normalized_text == "python"
        ));
    }

    #[tokio::test]
    async fn test_taxonomy_hit_promotes_on_first_observation() {
        let f = fixture(
            Some(TaxonomyMatch {
                id: "esco:k8s".to_string(),
                category: "devops".to_string(),
            }),
            None,
            None,
            &[],
        );
        let outcome = f
            .service
            .observe("kubernetes", "programming", "resume", "ran kubernetes")
            .await
            .unwrap();

        let ObservationOutcome::Decided {
            candidate,
            decision,
            audit_entry,
        } = outcome
        else {
            panic!("expected a full decision pass");
        };
        assert_eq!(candidate.frequency, 1);
        assert!(candidate.auto_approved);
        assert!(matches!(
            decision,
            Decision::Approve {
                reason: ApprovalReason::Taxonomy,
                confidence,
                ..
            } if confidence == 1.0
        ));
        let entry = audit_entry.expect("approval writes an audit entry");
        assert_eq!(entry.promoted_skill_id.as_deref(), Some("skill-kubernetes"));
        assert_eq!(f.dictionary.promote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.dictionary.promotions.lock().await.as_slice(),
            ["kubernetes"]
        );
    }

    #[tokio::test]
    async fn test_guard_veto_rejects_despite_strong_signals() {
        // "R" in a "general" context with classifier 0.95 and heavy
        // frequency must still be rejected.
        let f = fixture(
            None,
            Some(ClassifierResult {
                confidence: 0.95,
                category: "programming".to_string(),
            }),
            None,
            &[],
        );
        for _ in 0..49 {
            f.service.observe("R", "general", "resume", "R").await.unwrap();
        }
        let outcome = f.service.observe("R", "general", "resume", "R").await.unwrap();
        let ObservationOutcome::Decided {
            candidate, decision, ..
        } = outcome
        else {
            panic!("expected a decision pass");
        };
        assert_eq!(candidate.frequency, 50);
        assert_eq!(decision, Decision::Reject);
        assert!(!candidate.auto_approved);
        assert_eq!(f.dictionary.promote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_similarity_promotion_inherits_category() {
        let f = fixture(
            None,
            None,
            Some(SimilarityResult {
                skill: "kubernetes".to_string(),
                score: 0.9,
                category: "devops".to_string(),
            }),
            &[],
        );
        let outcome = f
            .service
            .observe("k8s-operator", "programming", "job", "k8s-operator work")
            .await
            .unwrap();
        let ObservationOutcome::Decided { candidate, decision, .. } = outcome else {
            panic!("expected a decision pass");
        };
        assert!(matches!(
            decision,
            Decision::Approve {
                reason: ApprovalReason::Similarity,
                confidence,
                category: Some(ref c),
            } if confidence == 0.9 && c == "devops"
        ));
        assert_eq!(candidate.category_suggestion.as_deref(), Some("devops"));
    }

    #[tokio::test]
    async fn test_frequency_and_classifier_needs_fifth_observation() {
        let f = fixture(
            None,
            Some(ClassifierResult {
                confidence: 0.9,
                category: "frameworks".to_string(),
            }),
            None,
            &[],
        );
        for i in 0..4 {
            let outcome = f
                .service
                .observe("foobar-framework", "programming", "resume", &format!("doc {i}"))
                .await
                .unwrap();
            let ObservationOutcome::Decided { decision, .. } = outcome else {
                panic!("expected a decision pass");
            };
            assert_eq!(decision, Decision::Pending, "observation {i} must stay pending");
        }
        let outcome = f
            .service
            .observe("foobar-framework", "programming", "resume", "doc 5")
            .await
            .unwrap();
        let ObservationOutcome::Decided { decision, .. } = outcome else {
            panic!("expected a decision pass");
        };
        assert!(matches!(
            decision,
            Decision::Approve {
                reason: ApprovalReason::FrequencyAndClassifier,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_candidate_not_repromoted() {
        let f = fixture(
            Some(TaxonomyMatch {
                id: "esco:tf".to_string(),
                category: "infrastructure".to_string(),
            }),
            None,
            None,
            &[],
        );
        f.service
            .observe("terraform", "programming", "resume", "tf")
            .await
            .unwrap();
        let outcome = f
            .service
            .observe("terraform", "programming", "job", "tf again")
            .await
            .unwrap();

        let ObservationOutcome::AlreadyApproved { candidate } = outcome else {
            panic!("expected terminal short-circuit");
        };
        assert_eq!(candidate.frequency, 2);
        assert_eq!(candidate.approval_reason.as_deref(), Some("taxonomy"));
        // Exactly one promotion and one audit entry despite two observations.
        assert_eq!(f.dictionary.promote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.audit.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_is_a_validation_error() {
        let f = fixture(None, None, None, &[]);
        let result = f.service.observe("   ", "programming", "resume", "").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_no_evidence_stays_pending() {
        let f = fixture(None, None, None, &[]);
        let outcome = f
            .service
            .observe("mystery-token", "programming", "resume", "mystery")
            .await
            .unwrap();
        let ObservationOutcome::Decided { candidate, decision, audit_entry } = outcome else {
            panic!("expected a decision pass");
        };
        assert_eq!(decision, Decision::Pending);
        assert!(!candidate.auto_approved);
        assert!(audit_entry.is_none());
    }
}
