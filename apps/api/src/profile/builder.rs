//! Profile Builder: produces the next version of a candidate's profile.
//!
//! Flow: load prior version → extract evidence from the triggering source →
//!       aggregate with historical evidence → budget the prompt →
//!       analysis call → link evidence → assign version → persist once.
//!
//! No locking here. Callers go through the `UpdateCoordinator`, which is what
//! keeps two builds for the same key from running at once.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm_client::CompletionRequest;
use crate::profile::aggregation::{
    aggregate, aggregate_confidence, claim_key, evidence_for_claim, render_summary,
};
use crate::profile::budget::{compress_history, NamedText, PartKind, PromptBudgeter, RoundSummary};
use crate::profile::error::ProfileError;
use crate::profile::evidence::{extract_from_feedback, extract_from_resume, listed_skills};
use crate::profile::invoker::{AnalysisInvoker, AnalysisPayload};
use crate::profile::models::{
    CandidateProfile, CandidateRecord, Evidence, InterviewFeedback, JobRecord,
    NewCandidateProfile, ProfileData, ProfileTrigger,
};
use crate::profile::prompts::{build_analysis_prompt, ANALYSIS_OPERATION, ANALYSIS_SYSTEM};
use crate::profile::store::{ProfileStore, SourceReader, StoreError};

// ────────────────────────────────────────────────────────────────────────────
// Analysis result
// ────────────────────────────────────────────────────────────────────────────

/// What the analysis call must return. Evidence is attached afterwards by the
/// builder, never trusted from the model.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub profile_data: ProfileData,
    pub overall_score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    pub ai_summary: String,
}

impl AnalysisPayload for AnalysisResult {
    fn validate(&self) -> Result<(), String> {
        if !self.overall_score.is_finite() || !(0.0..=100.0).contains(&self.overall_score) {
            return Err(format!("overall_score {} outside 0-100", self.overall_score));
        }
        if self.ai_summary.trim().is_empty() {
            return Err("ai_summary is empty".to_string());
        }
        if let Some(skill) = self.profile_data.skills.iter().find(|s| s.name.trim().is_empty()) {
            return Err(format!("skill with empty name (level '{}')", skill.level));
        }
        for (name, score) in [
            ("cultural_fit", self.profile_data.cultural_fit.score),
            ("leadership", self.profile_data.leadership.score),
        ] {
            if let Some(score) = score.filter(|s| *s > 100) {
                return Err(format!("{name}.score {score} outside 0-100"));
            }
        }
        Ok(())
    }
}

/// The raw material a trigger contributes.
enum TriggerSource {
    Resume(String),
    Interview(InterviewFeedback),
    /// Final evaluation adds no new source; it re-assesses what is known.
    Nothing,
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ProfileBuilder {
    store: Arc<dyn ProfileStore>,
    sources: Arc<dyn SourceReader>,
    invoker: AnalysisInvoker,
    budgeter: PromptBudgeter,
}

impl ProfileBuilder {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        sources: Arc<dyn SourceReader>,
        invoker: AnalysisInvoker,
        budgeter: PromptBudgeter,
    ) -> Self {
        Self {
            store,
            sources,
            invoker,
            budgeter,
        }
    }

    /// Builds and persists the next profile version for `trigger`.
    ///
    /// Steps:
    /// 1. load candidate, job, and the latest profile version
    /// 2. extract new evidence (fail-soft: errors count as no evidence)
    /// 3. aggregate historical + new evidence
    /// 4. fit the prompt parts into the token ceiling
    /// 5. analysis call
    /// 6. link evidence, assign `latest + 1`, create once (one retry on conflict)
    pub async fn build(
        &self,
        candidate_id: Uuid,
        trigger: &ProfileTrigger,
    ) -> Result<CandidateProfile, ProfileError> {
        trigger.validate()?;
        let stage = trigger.stage();

        // Step 1: load what we know
        let candidate = self
            .sources
            .candidate(candidate_id)
            .await?
            .ok_or_else(|| ProfileError::NotFound(format!("candidate {candidate_id}")))?;
        let prior = self.store.latest_by_candidate(candidate_id).await?;
        let job_id = candidate.job_id.or_else(|| prior.as_ref().and_then(|p| p.job_id));
        let job = match job_id {
            Some(id) => self.sources.job(id).await?,
            None => None,
        };
        let known_skills = known_skills(&candidate, job.as_ref(), prior.as_ref());

        // Step 2: new evidence from the triggering source
        let source = self.load_source(&candidate, trigger, prior.as_ref()).await?;
        let new_evidence = extract_new_evidence(&source, &known_skills);

        // Step 3: aggregate
        let historical = prior
            .as_ref()
            .map(|p| p.profile_data.historical_evidence())
            .unwrap_or_default();
        let aggregated = aggregate(historical, new_evidence);
        info!(
            %candidate_id,
            stage = %stage,
            evidence = aggregated.deduped.len(),
            duplicates = aggregated.all.len() - aggregated.deduped.len(),
            contradictions = aggregated.contradictions.len(),
            "evidence aggregated"
        );

        // Step 4: budgeted prompt
        let interviews = self.sources.interviews_for_candidate(candidate_id).await?;
        let mut parts = vec![
            NamedText::new(PartKind::PriorProfile, render_prior(prior.as_ref())),
            NamedText::new(PartKind::EvidenceSummary, render_summary(&aggregated)),
        ];
        parts.extend(source_parts(&source));
        if let Some(job) = &job {
            parts.push(NamedText::new(PartKind::JobDescription, render_job(job)));
        }
        let current_interview = match &source {
            TriggerSource::Interview(feedback) => Some(feedback.interview_id),
            _ => None,
        };
        let rounds: Vec<RoundSummary> = interviews
            .iter()
            .filter(|i| Some(i.interview_id) != current_interview)
            .map(|i| RoundSummary {
                round: i.round,
                interview_type: i.interview_type.clone(),
                rating: i.rating,
                recommendation: i.recommendation.clone(),
            })
            .collect();
        if !rounds.is_empty() {
            let history = compress_history(&rounds, self.budgeter.sub_ceiling(PartKind::History));
            parts.push(NamedText::new(PartKind::History, history));
        }

        let fitted = self.budgeter.fit(parts)?;
        let prompt = build_analysis_prompt(&candidate.name, stage, &fitted);
        debug!(%candidate_id, prompt_chars = prompt.len(), "analysis prompt built");

        // Step 5: analysis
        let request = CompletionRequest::json(ANALYSIS_OPERATION, ANALYSIS_SYSTEM, prompt);
        let analysis: AnalysisResult = self.invoker.invoke(&request).await?;

        // Step 6: assemble and persist
        let mut data_sources = prior
            .as_ref()
            .map(|p| p.data_sources.clone())
            .unwrap_or_default();
        if !data_sources.contains(&stage.label()) {
            data_sources.push(stage.label());
        }

        let draft = NewCandidateProfile {
            candidate_id,
            job_id,
            version: 0,
            stage,
            profile_data: link_evidence(analysis.profile_data, &aggregated.deduped),
            overall_score: analysis.overall_score.round() as u8,
            strengths: analysis.strengths,
            concerns: analysis.concerns,
            gaps: analysis.gaps,
            data_sources,
            ai_summary: analysis.ai_summary,
        };
        self.persist(draft).await
    }

    async fn load_source(
        &self,
        candidate: &CandidateRecord,
        trigger: &ProfileTrigger,
        prior: Option<&CandidateProfile>,
    ) -> Result<TriggerSource, ProfileError> {
        match trigger {
            ProfileTrigger::Resume => candidate
                .resume_text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| TriggerSource::Resume(t.to_string()))
                .ok_or_else(|| {
                    ProfileError::Validation(format!("candidate {} has no resume text", candidate.id))
                }),
            ProfileTrigger::Interview {
                interview_id,
                round,
            } => {
                let interview = self
                    .sources
                    .interview(*interview_id)
                    .await?
                    .ok_or_else(|| ProfileError::NotFound(format!("interview {interview_id}")))?;
                if interview.candidate_id != candidate.id {
                    return Err(ProfileError::Validation(format!(
                        "interview {interview_id} does not belong to candidate {}",
                        candidate.id
                    )));
                }
                if interview.round != *round {
                    return Err(ProfileError::Validation(format!(
                        "interview {interview_id} is round {}, trigger says round {round}",
                        interview.round
                    )));
                }
                if interview.completed_at.is_none() {
                    return Err(ProfileError::Validation(format!(
                        "interview {interview_id} has no submitted feedback"
                    )));
                }
                Ok(TriggerSource::Interview(interview))
            }
            ProfileTrigger::FinalEvaluation => {
                if prior.is_none() {
                    return Err(ProfileError::Validation(
                        "final evaluation requires an existing profile".to_string(),
                    ));
                }
                Ok(TriggerSource::Nothing)
            }
        }
    }

    /// The version is read here, after the analysis returned, so a failed
    /// attempt never consumes a number.
    async fn persist(&self, draft: NewCandidateProfile) -> Result<CandidateProfile, ProfileError> {
        let candidate_id = draft.candidate_id;
        let version = self.next_version(candidate_id).await?;

        let created = match self.store.create(NewCandidateProfile { version, ..draft.clone() }).await {
            Err(StoreError::VersionConflict { version, .. }) => {
                warn!(%candidate_id, version, "profile version taken, recomputing once");
                let retry = self.next_version(candidate_id).await?;
                self.store
                    .create(NewCandidateProfile {
                        version: retry,
                        ..draft
                    })
                    .await?
            }
            other => other?,
        };

        info!(
            %candidate_id,
            version = created.version,
            stage = %created.stage,
            overall_score = created.overall_score,
            "profile version persisted"
        );
        Ok(created)
    }

    async fn next_version(&self, candidate_id: Uuid) -> Result<i32, ProfileError> {
        Ok(self
            .store
            .latest_by_candidate(candidate_id)
            .await?
            .map_or(1, |p| p.version + 1))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn extract_new_evidence(source: &TriggerSource, known_skills: &[String]) -> Vec<Evidence> {
    let extracted = match source {
        TriggerSource::Resume(text) => extract_from_resume(text, known_skills),
        TriggerSource::Interview(feedback) => extract_from_feedback(feedback, known_skills),
        TriggerSource::Nothing => Ok(Vec::new()),
    };
    extracted.unwrap_or_else(|e| {
        warn!(error = %e, "evidence extraction failed, continuing without new evidence");
        Vec::new()
    })
}

/// Skills worth matching by name: job requirements, listed resume skills, and
/// skills already on the profile.
fn known_skills(
    candidate: &CandidateRecord,
    job: Option<&JobRecord>,
    prior: Option<&CandidateProfile>,
) -> Vec<String> {
    let mut skills: Vec<String> = Vec::new();
    let candidates = job
        .map(|j| j.required_skills.clone())
        .unwrap_or_default()
        .into_iter()
        .chain(candidate.resume_text.as_deref().map(listed_skills).unwrap_or_default())
        .chain(
            prior
                .map(|p| p.profile_data.skills.iter().map(|s| s.name.clone()).collect::<Vec<_>>())
                .unwrap_or_default(),
        );
    for skill in candidates {
        if !skills.iter().any(|s| s.eq_ignore_ascii_case(&skill)) {
            skills.push(skill);
        }
    }
    skills
}

fn source_parts(source: &TriggerSource) -> Vec<NamedText> {
    match source {
        TriggerSource::Resume(text) => vec![NamedText::new(PartKind::Resume, text.clone())],
        TriggerSource::Interview(feedback) => {
            let mut parts = vec![NamedText::new(PartKind::Feedback, render_feedback(feedback))];
            if let Some(notes) = feedback.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                parts.push(NamedText::new(PartKind::Notes, notes));
            }
            if let Some(transcript) = feedback.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
                parts.push(NamedText::new(PartKind::Transcript, transcript));
            }
            parts
        }
        TriggerSource::Nothing => Vec::new(),
    }
}

fn render_prior(prior: Option<&CandidateProfile>) -> String {
    let Some(prior) = prior else {
        return "No prior profile.".to_string();
    };
    let skills = prior
        .profile_data
        .skills
        .iter()
        .map(|s| format!("{} ({}, {:.0})", s.name, s.level, s.confidence))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Version {} ({}), overall score {}\nSummary: {}\nSkills: {}\nStrengths: {}\nConcerns: {}\nGaps: {}",
        prior.version,
        prior.stage,
        prior.overall_score,
        prior.ai_summary,
        skills,
        prior.strengths.join("; "),
        prior.concerns.join("; "),
        prior.gaps.join("; ")
    )
}

fn render_feedback(feedback: &InterviewFeedback) -> String {
    let mut out = format!(
        "Round {} ({}), rating {}, recommendation {}\n",
        feedback.round,
        feedback.interview_type,
        feedback
            .rating
            .map(|r| format!("{r}/5"))
            .unwrap_or_else(|| "n/a".to_string()),
        feedback.recommendation.as_deref().unwrap_or("none")
    );
    for rating in &feedback.skill_ratings {
        out.push_str(&format!("- {} {}/5", rating.skill, rating.rating));
        if let Some(comment) = &rating.comment {
            out.push_str(&format!(": {comment}"));
        }
        out.push('\n');
    }
    for (label, items) in [
        ("Strength", &feedback.strengths),
        ("Concern", &feedback.concerns),
        ("Observed", &feedback.behavioral_observations),
    ] {
        for item in items {
            out.push_str(&format!("{label}: {item}\n"));
        }
    }
    out
}

fn render_job(job: &JobRecord) -> String {
    format!(
        "{}\n{}\nRequired skills: {}",
        job.title,
        job.description,
        job.required_skills.join(", ")
    )
}

/// Attaches supporting evidence to every assessment and recomputes skill
/// confidence from it. Skills with no evidence keep the model's confidence.
fn link_evidence(mut data: ProfileData, evidence: &[Evidence]) -> ProfileData {
    for skill in &mut data.skills {
        let linked = evidence_for_claim(evidence, &format!("skill: {}", skill.name));
        match aggregate_confidence(&linked) {
            Some(confidence) => skill.confidence = confidence,
            None if skill.level.is_empty() => skill.level = "unverified".to_string(),
            None => {}
        }
        skill.evidence = linked;
    }

    let with_prefix = |prefixes: &[&str]| -> Vec<Evidence> {
        evidence
            .iter()
            .filter(|e| {
                let key = claim_key(e);
                prefixes.iter().any(|p| key.starts_with(p))
            })
            .cloned()
            .collect()
    };
    data.leadership.evidence = with_prefix(&["leadership"]);
    data.experience.evidence = with_prefix(&["experience"]);
    data.cultural_fit.evidence = with_prefix(&["communication", "collaboration"]);
    data.evidence_log = evidence.to_vec();
    data
}
