//! In-memory collaborators and fixtures for profile engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::llm_client::{Completion, CompletionProvider, CompletionRequest, LlmError, TokenUsage};
use crate::profile::budget::{estimate_tokens, PromptBudgeter};
use crate::profile::builder::ProfileBuilder;
use crate::profile::invoker::{AnalysisInvoker, InvokerConfig, UsageRecord, UsageTracker};
use crate::profile::models::{
    CandidateProfile, CandidateRecord, InterviewFeedback, JobRecord, NewCandidateProfile,
    ProfileData, ProfileStage, SkillRating,
};
use crate::profile::store::{ProfileStore, SourceReader, StoreError};

// ────────────────────────────────────────────────────────────────────────────
// Completion provider
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Script {
    /// Never resolves.
    Hang,
    /// Fails with an API error carrying this status.
    Fail { status: u16 },
    Respond(String),
    /// Responds after sleeping.
    Delayed(Duration, String),
}

/// Plays back scripted outcomes. Once the script runs out the last entry repeats.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Mutex<Option<Script>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        let fallback = scripts.last().cloned();
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(script: Script) -> Self {
        Self::new(vec![script])
    }

    /// Queues `script` behind whatever is still pending.
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or(Script::Fail { status: 500 })
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let content = match self.next_script() {
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            Script::Fail { status } => {
                return Err(LlmError::Status {
                    status,
                    message: format!("scripted failure {status}"),
                })
            }
            Script::Respond(content) => content,
            Script::Delayed(delay, content) => {
                tokio::time::sleep(delay).await;
                content
            }
        };

        Ok(Completion {
            content,
            usage: TokenUsage {
                prompt_tokens: estimate_tokens(&request.prompt) as u32,
                completion_tokens: 200,
            },
        })
    }
}

#[derive(Default)]
pub struct RecordingUsageTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl RecordingUsageTracker {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl UsageTracker for RecordingUsageTracker {
    fn record(&self, record: UsageRecord) {
        self.records.lock().unwrap().push(record);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store and readers
// ────────────────────────────────────────────────────────────────────────────

/// Enforces the `(candidate_id, version)` uniqueness the database provides.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<Vec<CandidateProfile>>,
    create_calls: AtomicUsize,
    racing_writes: Mutex<Vec<NewCandidateProfile>>,
}

impl InMemoryProfileStore {
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Inserts directly, bypassing the call counter.
    pub fn seed(&self, profile: NewCandidateProfile) -> CandidateProfile {
        self.insert(profile).expect("seeded version must be free")
    }

    /// The next `create` first lands `profile` as if another writer won the race.
    pub fn race_next_create(&self, profile: NewCandidateProfile) {
        self.racing_writes.lock().unwrap().push(profile);
    }

    pub fn versions(&self, candidate_id: Uuid) -> Vec<i32> {
        let mut versions: Vec<i32> = self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.candidate_id == candidate_id)
            .map(|p| p.version)
            .collect();
        versions.sort_unstable();
        versions
    }

    fn insert(&self, profile: NewCandidateProfile) -> Result<CandidateProfile, StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        if profiles
            .iter()
            .any(|p| p.candidate_id == profile.candidate_id && p.version == profile.version)
        {
            return Err(StoreError::VersionConflict {
                candidate_id: profile.candidate_id,
                version: profile.version,
            });
        }
        let stored = CandidateProfile {
            id: Uuid::new_v4(),
            candidate_id: profile.candidate_id,
            job_id: profile.job_id,
            version: profile.version,
            stage: profile.stage,
            profile_data: profile.profile_data,
            overall_score: profile.overall_score,
            strengths: profile.strengths,
            concerns: profile.concerns,
            gaps: profile.gaps,
            data_sources: profile.data_sources,
            ai_summary: profile.ai_summary,
            created_at: Utc::now(),
        };
        profiles.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn create(&self, profile: NewCandidateProfile) -> Result<CandidateProfile, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let racing: Vec<_> = self.racing_writes.lock().unwrap().drain(..).collect();
        for competitor in racing {
            self.insert(competitor)?;
        }
        self.insert(profile)
    }

    async fn list_by_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateProfile>, StoreError> {
        let mut found: Vec<CandidateProfile> = self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.candidate_id == candidate_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.version);
        Ok(found)
    }

    /// Yields after reading, like a database round trip, so concurrent
    /// writers can both see the same latest version.
    async fn latest_by_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateProfile>, StoreError> {
        let latest = self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.candidate_id == candidate_id)
            .max_by_key(|p| p.version)
            .cloned();
        tokio::task::yield_now().await;
        Ok(latest)
    }
}

#[derive(Default)]
pub struct InMemorySourceReader {
    candidates: Mutex<HashMap<Uuid, CandidateRecord>>,
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    interviews: Mutex<HashMap<Uuid, InterviewFeedback>>,
}

impl InMemorySourceReader {
    pub fn add_candidate(&self, candidate: CandidateRecord) {
        self.candidates.lock().unwrap().insert(candidate.id, candidate);
    }

    pub fn add_job(&self, job: JobRecord) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn add_interview(&self, interview: InterviewFeedback) {
        self.interviews
            .lock()
            .unwrap()
            .insert(interview.interview_id, interview);
    }
}

#[async_trait]
impl SourceReader for InMemorySourceReader {
    async fn candidate(&self, id: Uuid) -> Result<Option<CandidateRecord>, StoreError> {
        Ok(self.candidates.lock().unwrap().get(&id).cloned())
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn interview(&self, id: Uuid) -> Result<Option<InterviewFeedback>, StoreError> {
        Ok(self.interviews.lock().unwrap().get(&id).cloned())
    }

    async fn interviews_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<InterviewFeedback>, StoreError> {
        let mut found: Vec<InterviewFeedback> = self
            .interviews
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.candidate_id == candidate_id && i.completed_at.is_some())
            .cloned()
            .collect();
        found.sort_by_key(|i| i.round);
        Ok(found)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixtures
// ────────────────────────────────────────────────────────────────────────────

pub const RESUME: &str = "\
EXPERIENCE
Senior Engineer, Acme Corp
- 5 years of management experience leading platform teams
- Cut p99 latency by 40% by rewriting the ingest path in Rust
Skills: Rust, PostgreSQL, Kubernetes";

/// A valid analysis payload.
pub fn analysis_json(score: u8) -> String {
    serde_json::json!({
        "profile_data": {
            "skills": [
                { "name": "Rust", "level": "proficient", "confidence": 50 },
                { "name": "Kubernetes", "level": "familiar", "confidence": 40 }
            ],
            "experience": { "years_estimate": 5.0, "summary": "Platform engineering" },
            "cultural_fit": { "score": 70, "notes": "Collaborative" },
            "leadership": { "score": 45, "notes": "Management claim not confirmed" }
        },
        "overall_score": score,
        "strengths": ["Systems programming"],
        "concerns": ["Management experience contradicted in interview"],
        "gaps": ["Kubernetes depth"],
        "ai_summary": "Strong individual contributor."
    })
    .to_string()
}

pub fn candidate(job_id: Option<Uuid>) -> CandidateRecord {
    CandidateRecord {
        id: Uuid::new_v4(),
        name: "Ada Example".to_string(),
        job_id,
        resume_text: Some(RESUME.to_string()),
    }
}

pub fn job() -> JobRecord {
    JobRecord {
        id: Uuid::new_v4(),
        title: "Staff Platform Engineer".to_string(),
        description: "Own the data platform. Rust and PostgreSQL daily.".to_string(),
        required_skills: vec!["Rust".to_string(), "PostgreSQL".to_string()],
    }
}

pub fn interview(candidate_id: Uuid, round: u32) -> InterviewFeedback {
    InterviewFeedback {
        interview_id: Uuid::new_v4(),
        candidate_id,
        round,
        interview_type: if round == 1 { "technical" } else { "system_design" }.to_string(),
        rating: Some(4),
        recommendation: Some("hire".to_string()),
        skill_ratings: vec![SkillRating {
            skill: "Rust".to_string(),
            rating: 5,
            comment: Some("Wrote idiomatic async code under time pressure".to_string()),
        }],
        strengths: vec!["Clear reasoning about trade-offs".to_string()],
        concerns: vec!["Has never managed a team".to_string()],
        behavioral_observations: vec![],
        notes: Some("Asked good clarifying questions.".to_string()),
        transcript: None,
        completed_at: Some(Utc::now()),
    }
}

pub fn new_profile(candidate_id: Uuid, version: i32, stage: ProfileStage) -> NewCandidateProfile {
    NewCandidateProfile {
        candidate_id,
        job_id: None,
        version,
        stage,
        profile_data: ProfileData::default(),
        overall_score: 60,
        strengths: vec![],
        concerns: vec![],
        gaps: vec![],
        data_sources: vec![stage.label()],
        ai_summary: format!("version {version}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

/// One candidate with a job and a resume, wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryProfileStore>,
    pub sources: Arc<InMemorySourceReader>,
    pub provider: Arc<ScriptedProvider>,
    pub usage: Arc<RecordingUsageTracker>,
    pub candidate_id: Uuid,
}

impl Harness {
    pub fn new(scripts: Vec<Script>) -> Self {
        let sources = Arc::new(InMemorySourceReader::default());
        let job = job();
        let candidate = candidate(Some(job.id));
        let candidate_id = candidate.id;
        sources.add_job(job);
        sources.add_candidate(candidate);
        Self {
            store: Arc::new(InMemoryProfileStore::default()),
            sources,
            provider: Arc::new(ScriptedProvider::new(scripts)),
            usage: Arc::new(RecordingUsageTracker::default()),
            candidate_id,
        }
    }

    pub fn builder(&self) -> ProfileBuilder {
        self.builder_with(InvokerConfig {
            attempt_timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_step: Duration::from_millis(100),
        })
    }

    pub fn builder_with(&self, config: InvokerConfig) -> ProfileBuilder {
        let invoker = AnalysisInvoker::new(self.provider.clone(), self.usage.clone(), config);
        ProfileBuilder::new(
            self.store.clone(),
            self.sources.clone(),
            invoker,
            PromptBudgeter::new(12_000),
        )
    }

    /// Adds a completed interview for this candidate.
    pub fn add_interview(&self, round: u32) -> InterviewFeedback {
        let interview = interview(self.candidate_id, round);
        self.sources.add_interview(interview.clone());
        interview
    }
}
