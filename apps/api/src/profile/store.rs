//! Persistence collaborators: the append-only profile store, the read-only
//! source readers, and the usage sink.
//!
//! CRITICAL: profiles are append-only. Never UPDATE an existing row; the
//! `(candidate_id, version)` unique constraint is what turns a racing insert
//! into a `VersionConflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::profile::invoker::{TracingUsageTracker, UsageRecord, UsageTracker};
use crate::profile::models::{
    CandidateProfile, CandidateRecord, InterviewFeedback, JobRecord, NewCandidateProfile,
    ProfileData, SkillRating,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile version {version} already exists for candidate {candidate_id}")]
    VersionConflict { candidate_id: Uuid, version: i32 },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Inserts a new version. Fails with `VersionConflict` if the version is taken.
    async fn create(&self, profile: NewCandidateProfile) -> Result<CandidateProfile, StoreError>;

    /// All versions, ascending.
    async fn list_by_candidate(&self, candidate_id: Uuid)
        -> Result<Vec<CandidateProfile>, StoreError>;

    async fn latest_by_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateProfile>, StoreError>;
}

/// By-id lookups into the rest of the recruiting application.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn candidate(&self, id: Uuid) -> Result<Option<CandidateRecord>, StoreError>;

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    async fn interview(&self, id: Uuid) -> Result<Option<InterviewFeedback>, StoreError>;

    /// Completed interviews, ordered by round.
    async fn interviews_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<InterviewFeedback>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
struct CandidateProfileRow {
    id: Uuid,
    candidate_id: Uuid,
    job_id: Option<Uuid>,
    version: i32,
    stage: String,
    profile_data: Value,
    overall_score: i16,
    strengths: Vec<String>,
    concerns: Vec<String>,
    gaps: Vec<String>,
    data_sources: Vec<String>,
    ai_summary: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CandidateProfileRow> for CandidateProfile {
    type Error = StoreError;

    fn try_from(row: CandidateProfileRow) -> Result<Self, Self::Error> {
        let stage = row
            .stage
            .parse()
            .map_err(|e| StoreError::Backend(format!("profile {}: {e}", row.id)))?;
        let profile_data: ProfileData = serde_json::from_value(row.profile_data)
            .map_err(|e| StoreError::Backend(format!("profile {} data: {e}", row.id)))?;
        Ok(CandidateProfile {
            id: row.id,
            candidate_id: row.candidate_id,
            job_id: row.job_id,
            version: row.version,
            stage,
            profile_data,
            overall_score: row.overall_score.clamp(0, 100) as u8,
            strengths: row.strengths,
            concerns: row.concerns,
            gaps: row.gaps,
            data_sources: row.data_sources,
            ai_summary: row.ai_summary,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct CandidateRow {
    id: Uuid,
    name: String,
    job_id: Option<Uuid>,
    resume_text: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: Uuid,
    title: String,
    description: String,
    required_skills: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
struct InterviewRow {
    id: Uuid,
    candidate_id: Uuid,
    round: i32,
    interview_type: String,
    rating: Option<i16>,
    recommendation: Option<String>,
    feedback: Option<Value>,
    notes: Option<String>,
    transcript: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

/// Shape of the `interviews.feedback` JSONB column.
#[derive(Debug, Default, Deserialize)]
struct FeedbackBody {
    #[serde(default)]
    skill_ratings: Vec<SkillRating>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    behavioral_observations: Vec<String>,
}

impl TryFrom<InterviewRow> for InterviewFeedback {
    type Error = StoreError;

    fn try_from(row: InterviewRow) -> Result<Self, Self::Error> {
        let body: FeedbackBody = match row.feedback {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Backend(format!("interview {} feedback: {e}", row.id)))?,
            None => FeedbackBody::default(),
        };
        Ok(InterviewFeedback {
            interview_id: row.id,
            candidate_id: row.candidate_id,
            round: row.round.max(0) as u32,
            interview_type: row.interview_type,
            rating: row.rating.map(|r| r.clamp(0, 255) as u8),
            recommendation: row.recommendation,
            skill_ratings: body.skill_ratings,
            strengths: body.strengths,
            concerns: body.concerns,
            behavioral_observations: body.behavioral_observations,
            notes: row.notes,
            transcript: row.transcript,
            completed_at: row.completed_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PgProfileStore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn create(&self, profile: NewCandidateProfile) -> Result<CandidateProfile, StoreError> {
        let profile_data = serde_json::to_value(&profile.profile_data)
            .map_err(|e| StoreError::Backend(format!("serialize profile data: {e}")))?;

        let inserted = sqlx::query_as::<_, CandidateProfileRow>(
            r#"
            INSERT INTO candidate_profiles
                (id, candidate_id, job_id, version, stage, profile_data, overall_score,
                 strengths, concerns, gaps, data_sources, ai_summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(profile.candidate_id)
        .bind(profile.job_id)
        .bind(profile.version)
        .bind(profile.stage.label())
        .bind(&profile_data)
        .bind(i16::from(profile.overall_score))
        .bind(&profile.strengths)
        .bind(&profile.concerns)
        .bind(&profile.gaps)
        .bind(&profile.data_sources)
        .bind(&profile.ai_summary)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::VersionConflict {
                    candidate_id: profile.candidate_id,
                    version: profile.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateProfile>, StoreError> {
        sqlx::query_as::<_, CandidateProfileRow>(
            "SELECT * FROM candidate_profiles WHERE candidate_id = $1 ORDER BY version ASC",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CandidateProfile::try_from)
        .collect()
    }

    async fn latest_by_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateProfile>, StoreError> {
        sqlx::query_as::<_, CandidateProfileRow>(
            "SELECT * FROM candidate_profiles WHERE candidate_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?
        .map(CandidateProfile::try_from)
        .transpose()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PgSourceReader
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgSourceReader {
    pool: PgPool,
}

impl PgSourceReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    async fn candidate(&self, id: Uuid) -> Result<Option<CandidateRecord>, StoreError> {
        let row: Option<CandidateRow> = sqlx::query_as(
            "SELECT id, name, job_id, resume_text FROM candidates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| CandidateRecord {
            id: r.id,
            name: r.name,
            job_id: r.job_id,
            resume_text: r.resume_text,
        }))
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, title, description, required_skills FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| JobRecord {
            id: r.id,
            title: r.title,
            description: r.description,
            required_skills: r.required_skills,
        }))
    }

    async fn interview(&self, id: Uuid) -> Result<Option<InterviewFeedback>, StoreError> {
        let row: Option<InterviewRow> = sqlx::query_as(
            r#"
            SELECT id, candidate_id, round, interview_type, rating, recommendation,
                   feedback, notes, transcript, completed_at
            FROM interviews
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InterviewFeedback::try_from).transpose()
    }

    async fn interviews_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<InterviewFeedback>, StoreError> {
        let rows: Vec<InterviewRow> = sqlx::query_as(
            r#"
            SELECT id, candidate_id, round, interview_type, rating, recommendation,
                   feedback, notes, transcript, completed_at
            FROM interviews
            WHERE candidate_id = $1 AND completed_at IS NOT NULL
            ORDER BY round ASC
            "#,
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InterviewFeedback::try_from).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PgUsageTracker
// ────────────────────────────────────────────────────────────────────────────

/// Logs each analysis attempt, then writes one `ai_usage` row for it on a
/// detached task.
#[derive(Clone)]
pub struct PgUsageTracker {
    pool: PgPool,
    log: TracingUsageTracker,
}

impl PgUsageTracker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            log: TracingUsageTracker,
        }
    }
}

impl UsageTracker for PgUsageTracker {
    fn record(&self, record: UsageRecord) {
        self.log.record(record.clone());
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(operation = %record.operation, "no runtime for usage tracking; usage logged but not persisted");
            return;
        };
        let pool = self.pool.clone();
        handle.spawn(async move {
            let usage = record.usage.unwrap_or_default();
            let result = sqlx::query(
                r#"
                INSERT INTO ai_usage
                    (operation, model, prompt_tokens, completion_tokens, success, latency_ms, retry_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&record.operation)
            .bind(&record.model)
            .bind(usage.prompt_tokens as i32)
            .bind(usage.completion_tokens as i32)
            .bind(record.success)
            .bind(record.latency_ms as i64)
            .bind(record.retry_count as i32)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(operation = %record.operation, error = %e, "failed to record AI usage");
            }
        });
    }
}
