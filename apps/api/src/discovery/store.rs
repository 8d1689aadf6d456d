//! Skill Memory Store — the durable record of every observed, not-yet-canonical
//! candidate, keyed by normalized text.
//!
//! The store is the only shared mutable resource in the engine; every per-field
//! merge rule lives here. `upsert_observation` is a single atomic
//! read-modify-write (conditional upsert keyed on the unique normalized text),
//! never a read-then-write pair, so concurrent observers of the same token
//! cannot lose increments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::discovery::models::{
    push_source_context, ApprovalReason, Signals, SkillCandidate, SourceContext,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Candidate {0} is already approved")]
    AlreadyApproved(Uuid),

    #[error("Candidate {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of one observation upsert. `previous_frequency` lets the stats
/// recorder detect threshold crossings without a second read.
#[derive(Debug, Clone)]
pub struct Observation {
    pub candidate: SkillCandidate,
    pub is_new: bool,
    pub previous_frequency: i64,
}

/// Persistence seam for candidate records. Backed by Postgres in production
/// and by an in-memory map in tests and embedded callers.
#[async_trait]
pub trait SkillStore: Send + Sync {
    /// Atomic "insert if absent, else increment frequency and append context".
    async fn upsert_observation(
        &self,
        normalized_text: &str,
        raw_text: &str,
        context: SourceContext,
    ) -> Result<Observation, StoreError>;

    /// Merges freshly collected signals using the per-field rules:
    /// classifier last-write-wins, similarity monotonic max, taxonomy sticky
    /// once positively set (id/category may refresh, never clear).
    async fn record_signals(
        &self,
        candidate_id: Uuid,
        signals: &Signals,
    ) -> Result<SkillCandidate, StoreError>;

    /// Sets the terminal approval fields. A second call fails with
    /// `AlreadyApproved` and never overwrites the recorded reason.
    async fn mark_approved(
        &self,
        candidate_id: Uuid,
        reason: ApprovalReason,
        confidence: f64,
        category: Option<&str>,
    ) -> Result<SkillCandidate, StoreError>;

    async fn get_by_normalized_text(
        &self,
        text: &str,
    ) -> Result<Option<SkillCandidate>, StoreError>;

    /// Candidates still awaiting evidence, most recently seen first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<SkillCandidate>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres backend
// ────────────────────────────────────────────────────────────────────────────

pub struct PgSkillStore {
    pool: PgPool,
}

impl PgSkillStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SkillStore for PgSkillStore {
    async fn upsert_observation(
        &self,
        normalized_text: &str,
        raw_text: &str,
        context: SourceContext,
    ) -> Result<Observation, StoreError> {
        let context_json = json!([context]);

        // Single statement: the ON CONFLICT arm increments in place and caps
        // the context ring by dropping index 0 once full. Inserts start at
        // frequency 1, updates add exactly 1, so the returned frequency alone
        // identifies new rows and the pre-update count.
        let candidate = sqlx::query_as::<_, SkillCandidate>(
            r#"
            INSERT INTO skill_candidates
                (id, raw_text, normalized_text, frequency, source_contexts, first_seen, last_seen)
            VALUES ($1, $2, $3, 1, $4, now(), now())
            ON CONFLICT (normalized_text) DO UPDATE SET
                frequency = skill_candidates.frequency + 1,
                last_seen = now(),
                source_contexts = CASE
                    WHEN jsonb_array_length(skill_candidates.source_contexts) >= $5
                    THEN (skill_candidates.source_contexts - 0) || $4
                    ELSE skill_candidates.source_contexts || $4
                END
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(raw_text)
        .bind(normalized_text)
        .bind(&context_json)
        .bind(crate::discovery::models::MAX_SOURCE_CONTEXTS as i32)
        .fetch_one(&self.pool)
        .await?;

        let is_new = candidate.frequency == 1;
        let previous_frequency = candidate.frequency - 1;
        Ok(Observation {
            candidate,
            is_new,
            previous_frequency,
        })
    }

    async fn record_signals(
        &self,
        candidate_id: Uuid,
        signals: &Signals,
    ) -> Result<SkillCandidate, StoreError> {
        let taxonomy_id = signals.taxonomy.as_ref().map(|t| t.id.as_str());
        let taxonomy_category = signals.taxonomy.as_ref().map(|t| t.category.as_str());
        let classifier_confidence = signals.classifier.as_ref().map(|c| c.confidence);
        let classifier_category = signals.classifier.as_ref().map(|c| c.category.as_str());
        let similarity_score = signals.similarity.as_ref().map(|s| s.score);
        let similar_to_skill = signals.similarity.as_ref().map(|s| s.skill.as_str());
        let similarity_category = signals.similarity.as_ref().map(|s| s.category.as_str());

        sqlx::query_as::<_, SkillCandidate>(
            r#"
            UPDATE skill_candidates SET
                taxonomy_validated = taxonomy_validated OR $2,
                taxonomy_id = COALESCE($3, taxonomy_id),
                taxonomy_category = COALESCE($4, taxonomy_category),
                classifier_confidence = COALESCE($5, classifier_confidence),
                classifier_category = COALESCE($6, classifier_category),
                similar_to_skill = CASE
                    WHEN $7::float8 > COALESCE(similarity_score, -1) THEN $8
                    ELSE similar_to_skill
                END,
                similarity_category = CASE
                    WHEN $7::float8 > COALESCE(similarity_score, -1) THEN $9
                    ELSE similarity_category
                END,
                similarity_score = CASE
                    WHEN $7::float8 > COALESCE(similarity_score, -1) THEN $7
                    ELSE similarity_score
                END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(candidate_id)
        .bind(signals.taxonomy.is_some())
        .bind(taxonomy_id)
        .bind(taxonomy_category)
        .bind(classifier_confidence)
        .bind(classifier_category)
        .bind(similarity_score)
        .bind(similar_to_skill)
        .bind(similarity_category)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(candidate_id))
    }

    async fn mark_approved(
        &self,
        candidate_id: Uuid,
        reason: ApprovalReason,
        confidence: f64,
        category: Option<&str>,
    ) -> Result<SkillCandidate, StoreError> {
        // Conditional on auto_approved = FALSE: the loser of a concurrent
        // double-decision gets zero rows back, not an overwrite.
        let updated = sqlx::query_as::<_, SkillCandidate>(
            r#"
            UPDATE skill_candidates SET
                auto_approved = TRUE,
                approval_reason = $2,
                approval_confidence = $3,
                category_suggestion = COALESCE($4, category_suggestion)
            WHERE id = $1 AND auto_approved = FALSE
            RETURNING *
            "#,
        )
        .bind(candidate_id)
        .bind(reason.as_str())
        .bind(confidence)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(candidate) => Ok(candidate),
            None => {
                let exists: Option<bool> = sqlx::query_scalar(
                    "SELECT auto_approved FROM skill_candidates WHERE id = $1",
                )
                .bind(candidate_id)
                .fetch_optional(&self.pool)
                .await?;
                match exists {
                    Some(_) => Err(StoreError::AlreadyApproved(candidate_id)),
                    None => Err(StoreError::NotFound(candidate_id)),
                }
            }
        }
    }

    async fn get_by_normalized_text(
        &self,
        text: &str,
    ) -> Result<Option<SkillCandidate>, StoreError> {
        Ok(sqlx::query_as::<_, SkillCandidate>(
            "SELECT * FROM skill_candidates WHERE normalized_text = $1",
        )
        .bind(text)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<SkillCandidate>, StoreError> {
        Ok(sqlx::query_as::<_, SkillCandidate>(
            r#"
            SELECT * FROM skill_candidates
            WHERE auto_approved = FALSE
            ORDER BY last_seen DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ────────────────────────────────────────────────────────────────────────────

/// Map-backed store. One mutex guards the whole map, so each operation is a
/// single atomic read-modify-write, matching the Postgres contract.
#[derive(Default)]
pub struct InMemorySkillStore {
    inner: Arc<Mutex<HashMap<String, SkillCandidate>>>,
}

impl InMemorySkillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SkillStore for InMemorySkillStore {
    async fn upsert_observation(
        &self,
        normalized_text: &str,
        raw_text: &str,
        context: SourceContext,
    ) -> Result<Observation, StoreError> {
        let mut map = self.inner.lock().await;
        let now = Utc::now();

        if let Some(candidate) = map.get_mut(normalized_text) {
            let previous_frequency = candidate.frequency;
            candidate.frequency += 1;
            candidate.last_seen = now;
            let mut contexts = candidate.contexts();
            push_source_context(&mut contexts, context);
            candidate.source_contexts = serde_json::to_value(contexts).unwrap_or(json!([]));
            return Ok(Observation {
                candidate: candidate.clone(),
                is_new: false,
                previous_frequency,
            });
        }

        let candidate = SkillCandidate {
            id: Uuid::new_v4(),
            raw_text: raw_text.to_string(),
            normalized_text: normalized_text.to_string(),
            frequency: 1,
            taxonomy_validated: false,
            taxonomy_id: None,
            taxonomy_category: None,
            classifier_confidence: None,
            classifier_category: None,
            similarity_score: None,
            similar_to_skill: None,
            similarity_category: None,
            auto_approved: false,
            approval_reason: None,
            approval_confidence: None,
            category_suggestion: None,
            source_contexts: json!([context]),
            first_seen: now,
            last_seen: now,
        };
        map.insert(normalized_text.to_string(), candidate.clone());
        Ok(Observation {
            candidate,
            is_new: true,
            previous_frequency: 0,
        })
    }

    async fn record_signals(
        &self,
        candidate_id: Uuid,
        signals: &Signals,
    ) -> Result<SkillCandidate, StoreError> {
        let mut map = self.inner.lock().await;
        let candidate = map
            .values_mut()
            .find(|c| c.id == candidate_id)
            .ok_or(StoreError::NotFound(candidate_id))?;

        if let Some(taxonomy) = &signals.taxonomy {
            candidate.taxonomy_validated = true;
            candidate.taxonomy_id = Some(taxonomy.id.clone());
            candidate.taxonomy_category = Some(taxonomy.category.clone());
        }
        if let Some(classifier) = &signals.classifier {
            candidate.classifier_confidence = Some(classifier.confidence);
            candidate.classifier_category = Some(classifier.category.clone());
        }
        if let Some(similarity) = &signals.similarity {
            if similarity.score > candidate.similarity_score.unwrap_or(-1.0) {
                candidate.similarity_score = Some(similarity.score);
                candidate.similar_to_skill = Some(similarity.skill.clone());
                candidate.similarity_category = Some(similarity.category.clone());
            }
        }
        Ok(candidate.clone())
    }

    async fn mark_approved(
        &self,
        candidate_id: Uuid,
        reason: ApprovalReason,
        confidence: f64,
        category: Option<&str>,
    ) -> Result<SkillCandidate, StoreError> {
        let mut map = self.inner.lock().await;
        let candidate = map
            .values_mut()
            .find(|c| c.id == candidate_id)
            .ok_or(StoreError::NotFound(candidate_id))?;

        if candidate.auto_approved {
            return Err(StoreError::AlreadyApproved(candidate_id));
        }
        candidate.auto_approved = true;
        candidate.approval_reason = Some(reason.as_str().to_string());
        candidate.approval_confidence = Some(confidence);
        if let Some(category) = category {
            candidate.category_suggestion = Some(category.to_string());
        }
        Ok(candidate.clone())
    }

    async fn get_by_normalized_text(
        &self,
        text: &str,
    ) -> Result<Option<SkillCandidate>, StoreError> {
        Ok(self.inner.lock().await.get(text).cloned())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<SkillCandidate>, StoreError> {
        let map = self.inner.lock().await;
        let mut pending: Vec<_> = map.values().filter(|c| !c.auto_approved).cloned().collect();
        pending.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        pending.truncate(limit as usize);
        Ok(pending)
    }
}
