//! Signal Collector — wraps the three external validation lookups (taxonomy,
//! classifier, similarity) behind trait seams and normalizes their outputs.
//!
//! Each sub-lookup is independently fallible: a failure or timeout degrades
//! that signal to `None` instead of aborting the collection. Partial signals
//! are valid input to the decision engine. The three lookups run concurrently;
//! none depends on another's result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::discovery::models::{ClassifierResult, Signals, SimilarityResult, TaxonomyMatch};
use crate::llm_client::prompts::{SKILL_CLASSIFY_PROMPT, SKILL_CLASSIFY_SYSTEM};
use crate::llm_client::LlmClient;

/// Controlled-vocabulary lookup. `Ok(None)` means the taxonomy has no entry
/// for the text; `Err` means the service itself was unavailable.
#[async_trait]
pub trait TaxonomyService: Send + Sync {
    async fn lookup(&self, text: &str) -> Result<Option<TaxonomyMatch>>;
}

/// LLM-backed judgement of whether a token denotes a real skill.
#[async_trait]
pub trait ClassifierService: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifierResult>;
}

/// Embedding comparison against the canonical dictionary. `Ok(None)` means no
/// neighbor was found at all.
#[async_trait]
pub trait SimilarityService: Send + Sync {
    async fn most_similar(&self, text: &str) -> Result<Option<SimilarityResult>>;
}

/// Gathers the three signals for one candidate per observation event.
pub struct SignalCollector {
    taxonomy: Arc<dyn TaxonomyService>,
    classifier: Arc<dyn ClassifierService>,
    similarity: Arc<dyn SimilarityService>,
    /// Per-sub-lookup deadline; a timed-out lookup degrades to `None`.
    lookup_timeout: Duration,
}

impl SignalCollector {
    pub fn new(
        taxonomy: Arc<dyn TaxonomyService>,
        classifier: Arc<dyn ClassifierService>,
        similarity: Arc<dyn SimilarityService>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            taxonomy,
            classifier,
            similarity,
            lookup_timeout,
        }
    }

    /// Runs all three lookups concurrently, each under its own timeout, and
    /// joins the results. Malformed or out-of-range values become `None`.
    pub async fn collect(&self, candidate_text: &str) -> Signals {
        let taxonomy_fut = tokio::time::timeout(self.lookup_timeout, self.taxonomy.lookup(candidate_text));
        let classifier_fut =
            tokio::time::timeout(self.lookup_timeout, self.classifier.classify(candidate_text));
        let similarity_fut =
            tokio::time::timeout(self.lookup_timeout, self.similarity.most_similar(candidate_text));

        let (taxonomy_res, classifier_res, similarity_res) =
            tokio::join!(taxonomy_fut, classifier_fut, similarity_fut);

        let taxonomy = match taxonomy_res {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                debug!("Taxonomy lookup failed for '{candidate_text}': {e}");
                None
            }
            Err(_) => {
                warn!("Taxonomy lookup timed out for '{candidate_text}'");
                None
            }
        };

        let classifier = match classifier_res {
            Ok(Ok(result)) => sanitize_unit(result.confidence).map(|confidence| ClassifierResult {
                confidence,
                category: result.category,
            }),
            Ok(Err(e)) => {
                debug!("Classifier failed for '{candidate_text}': {e}");
                None
            }
            Err(_) => {
                warn!("Classifier timed out for '{candidate_text}'");
                None
            }
        };

        let similarity = match similarity_res {
            Ok(Ok(Some(result))) => sanitize_unit(result.score).map(|score| SimilarityResult {
                skill: result.skill,
                score,
                category: result.category,
            }),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                debug!("Similarity lookup failed for '{candidate_text}': {e}");
                None
            }
            Err(_) => {
                warn!("Similarity lookup timed out for '{candidate_text}'");
                None
            }
        };

        Signals {
            taxonomy,
            classifier,
            similarity,
        }
    }
}

/// Accepts only finite values inside [0,1]; anything else is a malformed
/// response and degrades the signal to `None`.
fn sanitize_unit(value: f64) -> Option<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP / LLM backed implementations
// ────────────────────────────────────────────────────────────────────────────

/// ESCO-style taxonomy lookup over HTTP: GET {base}/lookup?text=...
pub struct HttpTaxonomyService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TaxonomyLookupResponse {
    matched: bool,
    id: Option<String>,
    category: Option<String>,
}

impl HttpTaxonomyService {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl TaxonomyService for HttpTaxonomyService {
    async fn lookup(&self, text: &str) -> Result<Option<TaxonomyMatch>> {
        let response: TaxonomyLookupResponse = self
            .client
            .get(format!("{}/lookup", self.base_url))
            .query(&[("text", text)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.matched {
            return Ok(None);
        }
        match (response.id, response.category) {
            (Some(id), Some(category)) => Ok(Some(TaxonomyMatch { id, category })),
            _ => anyhow::bail!("taxonomy reported a match without id/category"),
        }
    }
}

/// Classifier backed by the shared Claude client and the skill prompt set.
pub struct LlmClassifierService {
    llm: LlmClient,
}

impl LlmClassifierService {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClassifierService for LlmClassifierService {
    async fn classify(&self, text: &str) -> Result<ClassifierResult> {
        let prompt = SKILL_CLASSIFY_PROMPT.replace("{candidate_text}", text);
        let result: ClassifierResult = self
            .llm
            .call_json(&prompt, SKILL_CLASSIFY_SYSTEM)
            .await
            .map_err(|e| anyhow::anyhow!("skill classification failed: {e}"))?;
        Ok(result)
    }
}

/// Embedding-similarity service over HTTP: GET {base}/most-similar?text=...
pub struct HttpSimilarityService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MostSimilarResponse {
    skill: Option<String>,
    score: Option<f64>,
    category: Option<String>,
}

impl HttpSimilarityService {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl SimilarityService for HttpSimilarityService {
    async fn most_similar(&self, text: &str) -> Result<Option<SimilarityResult>> {
        let response: MostSimilarResponse = self
            .client
            .get(format!("{}/most-similar", self.base_url))
            .query(&[("text", text)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (response.skill, response.score, response.category) {
            (Some(skill), Some(score), Some(category)) => Ok(Some(SimilarityResult {
                skill,
                score,
                category,
            })),
            _ => Ok(None),
        }
    }
}
