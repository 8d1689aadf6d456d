//! Audit & Stats Recorder — an immutable promotion trail plus incremental
//! daily counters.
//!
//! Audit rows are append-only. Never UPDATE an existing row; the mutable
//! candidate record and the immutable trail are deliberately separate
//! entities. Daily stats are upserted incrementally as events occur, never
//! recomputed from scratch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::discovery::models::{
    ApprovalReason, DailyStats, PromotionAuditEntry, Signals, SkillCandidate,
};

/// True exactly when this observation moved the candidate's frequency across
/// the threshold. Comparing pre/post guarantees the crossing fires once per
/// candidate no matter how many observations follow.
pub fn crossed_threshold(previous_frequency: i64, frequency: i64, threshold: i64) -> bool {
    previous_frequency < threshold && frequency >= threshold
}

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Writes one immutable audit row snapshotting the signals that justified
    /// the approval, then rolls today's promotion counters.
    async fn record_promotion(
        &self,
        candidate: &SkillCandidate,
        reason: ApprovalReason,
        confidence: f64,
        signals: &Signals,
        promoted_skill_id: Option<&str>,
    ) -> Result<PromotionAuditEntry>;

    /// Rolls today's observation counters. `high_frequency_count` increments
    /// only on the threshold crossing detected from `previous_frequency`.
    async fn record_observation(
        &self,
        candidate: &SkillCandidate,
        is_new: bool,
        previous_frequency: i64,
        freq_threshold: i64,
    ) -> Result<()>;

    async fn stats_for_day(&self, day: NaiveDate) -> Result<Option<DailyStats>>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres backend
// ────────────────────────────────────────────────────────────────────────────

pub struct PgAuditRecorder {
    pool: PgPool,
}

impl PgAuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generic over the executor so the upsert can join a larger transaction.
    async fn bump_stats<'e, E>(
        executor: E,
        discovered: i64,
        taxonomy_validated: i64,
        auto_approved: i64,
        high_frequency: i64,
    ) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO daily_stats
                (day, discovered_count, taxonomy_validated_count, auto_approved_count, high_frequency_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (day) DO UPDATE SET
                discovered_count = daily_stats.discovered_count + $2,
                taxonomy_validated_count = daily_stats.taxonomy_validated_count + $3,
                auto_approved_count = daily_stats.auto_approved_count + $4,
                high_frequency_count = daily_stats.high_frequency_count + $5
            "#,
        )
        .bind(Utc::now().date_naive())
        .bind(discovered)
        .bind(taxonomy_validated)
        .bind(auto_approved)
        .bind(high_frequency)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record_promotion(
        &self,
        candidate: &SkillCandidate,
        reason: ApprovalReason,
        confidence: f64,
        signals: &Signals,
        promoted_skill_id: Option<&str>,
    ) -> Result<PromotionAuditEntry> {
        // One transaction: an audit row with no matching counter increment
        // (or the reverse) must never be observable.
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, PromotionAuditEntry>(
            r#"
            INSERT INTO promotion_audit
                (id, candidate_id, promoted_skill_id, reason, confidence, signal_snapshot)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(candidate.id)
        .bind(promoted_skill_id)
        .bind(reason.as_str())
        .bind(confidence)
        .bind(signals.snapshot())
        .fetch_one(&mut *tx)
        .await?;

        let taxonomy_validated = i64::from(reason == ApprovalReason::Taxonomy);
        Self::bump_stats(&mut *tx, 0, taxonomy_validated, 1, 0).await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn record_observation(
        &self,
        _candidate: &SkillCandidate,
        is_new: bool,
        previous_frequency: i64,
        freq_threshold: i64,
    ) -> Result<()> {
        let discovered = i64::from(is_new);
        let high_frequency = i64::from(crossed_threshold(
            previous_frequency,
            previous_frequency + 1,
            freq_threshold,
        ));
        if discovered == 0 && high_frequency == 0 {
            return Ok(());
        }
        Self::bump_stats(&self.pool, discovered, 0, 0, high_frequency).await
    }

    async fn stats_for_day(&self, day: NaiveDate) -> Result<Option<DailyStats>> {
        Ok(
            sqlx::query_as::<_, DailyStats>("SELECT * FROM daily_stats WHERE day = $1")
                .bind(day)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct InMemoryAuditState {
    entries: Vec<PromotionAuditEntry>,
    stats: HashMap<NaiveDate, DailyStats>,
}

#[derive(Default)]
pub struct InMemoryAuditRecorder {
    inner: Arc<Mutex<InMemoryAuditState>>,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<PromotionAuditEntry> {
        self.inner.lock().await.entries.clone()
    }
}

fn day_entry(stats: &mut HashMap<NaiveDate, DailyStats>, day: NaiveDate) -> &mut DailyStats {
    stats.entry(day).or_insert_with(|| DailyStats {
        day,
        discovered_count: 0,
        taxonomy_validated_count: 0,
        auto_approved_count: 0,
        high_frequency_count: 0,
    })
}

#[async_trait]
impl AuditRecorder for InMemoryAuditRecorder {
    async fn record_promotion(
        &self,
        candidate: &SkillCandidate,
        reason: ApprovalReason,
        confidence: f64,
        signals: &Signals,
        promoted_skill_id: Option<&str>,
    ) -> Result<PromotionAuditEntry> {
        let mut state = self.inner.lock().await;
        let entry = PromotionAuditEntry {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            promoted_skill_id: promoted_skill_id.map(str::to_string),
            reason: reason.as_str().to_string(),
            confidence,
            signal_snapshot: signals.snapshot(),
            created_at: Utc::now(),
        };
        state.entries.push(entry.clone());

        let stats = day_entry(&mut state.stats, Utc::now().date_naive());
        stats.auto_approved_count += 1;
        if reason == ApprovalReason::Taxonomy {
            stats.taxonomy_validated_count += 1;
        }
        Ok(entry)
    }

    async fn record_observation(
        &self,
        _candidate: &SkillCandidate,
        is_new: bool,
        previous_frequency: i64,
        freq_threshold: i64,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        let stats = day_entry(&mut state.stats, Utc::now().date_naive());
        if is_new {
            stats.discovered_count += 1;
        }
        if crossed_threshold(previous_frequency, previous_frequency + 1, freq_threshold) {
            stats.high_frequency_count += 1;
        }
        Ok(())
    }

    async fn stats_for_day(&self, day: NaiveDate) -> Result<Option<DailyStats>> {
        Ok(self.inner.lock().await.stats.get(&day).cloned())
    }
}
