use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::error::ProfileError;

// ────────────────────────────────────────────────────────────────────────────
// Stages and triggers
// ────────────────────────────────────────────────────────────────────────────

/// Which triggering event produced a profile version.
///
/// Serialized as its label: `resume`, `after_interview_<round>`, `final_evaluation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileStage {
    Resume,
    AfterInterview(u32),
    FinalEvaluation,
}

const AFTER_INTERVIEW_PREFIX: &str = "after_interview_";

impl ProfileStage {
    pub fn label(&self) -> String {
        match self {
            ProfileStage::Resume => "resume".to_string(),
            ProfileStage::AfterInterview(round) => format!("{AFTER_INTERVIEW_PREFIX}{round}"),
            ProfileStage::FinalEvaluation => "final_evaluation".to_string(),
        }
    }
}

impl fmt::Display for ProfileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ProfileStage {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(ProfileStage::Resume),
            "final_evaluation" => Ok(ProfileStage::FinalEvaluation),
            other => other
                .strip_prefix(AFTER_INTERVIEW_PREFIX)
                .and_then(|round| round.parse::<u32>().ok())
                .filter(|round| *round >= 1)
                .map(ProfileStage::AfterInterview)
                .ok_or_else(|| ProfileError::Validation(format!("unknown profile stage '{other}'"))),
        }
    }
}

impl Serialize for ProfileStage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for ProfileStage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The event asking for a new profile version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileTrigger {
    /// The candidate's resume was parsed.
    Resume,
    /// An interview round finished and its feedback was submitted.
    Interview { interview_id: Uuid, round: u32 },
    /// The hiring team requested the final evaluation.
    FinalEvaluation,
}

impl ProfileTrigger {
    pub fn stage(&self) -> ProfileStage {
        match self {
            ProfileTrigger::Resume => ProfileStage::Resume,
            ProfileTrigger::Interview { round, .. } => ProfileStage::AfterInterview(*round),
            ProfileTrigger::FinalEvaluation => ProfileStage::FinalEvaluation,
        }
    }

    /// Identifies the triggering event inside a candidate's key space.
    /// Two submissions for the same interview round share a key.
    pub fn trigger_key(&self) -> String {
        self.stage().label()
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        match self {
            ProfileTrigger::Interview { round: 0, .. } => Err(ProfileError::Validation(
                "interview round must start at 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Evidence
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Resume,
    InterviewFeedback,
    BehavioralObservation,
    InterviewerNotes,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Resume => "resume",
            EvidenceSource::InterviewFeedback => "interview_feedback",
            EvidenceSource::BehavioralObservation => "behavioral_observation",
            EvidenceSource::InterviewerNotes => "interviewer_notes",
        }
    }

    /// Resume content is claimed by the candidate; everything else was observed
    /// by an interviewer.
    pub fn is_verified(&self) -> bool {
        !matches!(self, EvidenceSource::Resume)
    }
}

/// Ordered weakest to strongest so `Ord` follows evidential weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrength {
    Inferential,
    Weak,
    Moderate,
    Strong,
    Direct,
}

impl EvidenceStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceStrength::Inferential => "inferential",
            EvidenceStrength::Weak => "weak",
            EvidenceStrength::Moderate => "moderate",
            EvidenceStrength::Strong => "strong",
            EvidenceStrength::Direct => "direct",
        }
    }

    /// Weight used by the confidence aggregation.
    pub fn weight(&self) -> f64 {
        match self {
            EvidenceStrength::Direct => 1.0,
            EvidenceStrength::Strong => 0.8,
            EvidenceStrength::Moderate => 0.6,
            EvidenceStrength::Weak => 0.4,
            EvidenceStrength::Inferential => 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An atomic, attributable observation about a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Stable identifier. Older profile versions may carry evidence without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: EvidenceSource,
    pub strength: EvidenceStrength,
    /// 0 – 100
    pub confidence: u8,
    /// The normalized statement this evidence speaks to, e.g. `skill: rust`.
    #[serde(default)]
    pub claim: String,
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_details: Option<SourceDetails>,
}

/// Which side of a contradiction should win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    Claimed,
    Verified,
}

/// Derived pairing of a resume claim and interview evidence about the same statement.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contradiction {
    pub claim_key: String,
    pub claimed: Evidence,
    pub verified: Evidence,
    pub precedence: Precedence,
}

impl Contradiction {
    pub fn preferred(&self) -> &Evidence {
        match self.precedence {
            Precedence::Claimed => &self.claimed,
            Precedence::Verified => &self.verified,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Profile
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillAssessment {
    pub name: String,
    /// expert | proficient | familiar | unverified
    #[serde(default)]
    pub level: String,
    /// 0 – 100
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceAssessment {
    #[serde(default)]
    pub years_estimate: Option<f64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// Cultural fit and leadership share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAssessment {
    /// 0 – 100
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub skills: Vec<SkillAssessment>,
    #[serde(default)]
    pub experience: ExperienceAssessment,
    #[serde(default)]
    pub cultural_fit: SubAssessment,
    #[serde(default)]
    pub leadership: SubAssessment,
    /// Every deduplicated evidence item known when this version was built.
    #[serde(default)]
    pub evidence_log: Vec<Evidence>,
}

impl ProfileData {
    /// Evidence carried forward into the next version.
    ///
    /// The log already holds every item the assessments link to, so it is the
    /// whole history when present. Versions written without a log fall back to
    /// the evidence linked from each assessment.
    pub fn historical_evidence(&self) -> Vec<Evidence> {
        if !self.evidence_log.is_empty() {
            return self.evidence_log.clone();
        }
        let mut out = Vec::new();
        for skill in &self.skills {
            out.extend(skill.evidence.iter().cloned());
        }
        out.extend(self.experience.evidence.iter().cloned());
        out.extend(self.cultural_fit.evidence.iter().cloned());
        out.extend(self.leadership.evidence.iter().cloned());
        out
    }
}

/// One immutable snapshot of a candidate's assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Option<Uuid>,
    pub version: i32,
    pub stage: ProfileStage,
    pub profile_data: ProfileData,
    pub overall_score: u8,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub gaps: Vec<String>,
    pub data_sources: Vec<String>,
    pub ai_summary: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewCandidateProfile {
    pub candidate_id: Uuid,
    pub job_id: Option<Uuid>,
    pub version: i32,
    pub stage: ProfileStage,
    pub profile_data: ProfileData,
    pub overall_score: u8,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub gaps: Vec<String>,
    pub data_sources: Vec<String>,
    pub ai_summary: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Source records read from the rest of the application
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub name: String,
    pub job_id: Option<Uuid>,
    pub resume_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRating {
    pub skill: String,
    /// 1 – 5
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewFeedback {
    pub interview_id: Uuid,
    pub candidate_id: Uuid,
    pub round: u32,
    pub interview_type: String,
    /// 1 – 5
    pub rating: Option<u8>,
    /// strong_hire | hire | no_hire | strong_no_hire
    pub recommendation: Option<String>,
    #[serde(default)]
    pub skill_ratings: Vec<SkillRating>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub behavioral_observations: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels_parse_back() {
        for stage in [
            ProfileStage::Resume,
            ProfileStage::AfterInterview(3),
            ProfileStage::FinalEvaluation,
        ] {
            assert_eq!(stage.label().parse::<ProfileStage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_stage_rejects_round_zero_and_garbage() {
        assert!("after_interview_0".parse::<ProfileStage>().is_err());
        assert!("after_interview_x".parse::<ProfileStage>().is_err());
        assert!("phone_screen".parse::<ProfileStage>().is_err());
    }

    #[test]
    fn test_trigger_key_shared_by_same_round() {
        let a = ProfileTrigger::Interview {
            interview_id: Uuid::new_v4(),
            round: 2,
        };
        let b = ProfileTrigger::Interview {
            interview_id: Uuid::new_v4(),
            round: 2,
        };
        assert_eq!(a.trigger_key(), b.trigger_key());
        assert_eq!(a.trigger_key(), "after_interview_2");
    }

    #[test]
    fn test_trigger_deserializes_from_tagged_json() {
        let id = Uuid::new_v4();
        let json = serde_json::json!({ "type": "interview", "interview_id": id, "round": 1 });
        let trigger: ProfileTrigger = serde_json::from_value(json).unwrap();
        assert_eq!(
            trigger,
            ProfileTrigger::Interview {
                interview_id: id,
                round: 1
            }
        );
    }

    #[test]
    fn test_strength_ordering_matches_weights() {
        assert!(EvidenceStrength::Direct > EvidenceStrength::Strong);
        assert!(EvidenceStrength::Weak > EvidenceStrength::Inferential);
        assert!(EvidenceStrength::Strong.weight() > EvidenceStrength::Moderate.weight());
    }

    #[test]
    fn test_historical_evidence_prefers_log() {
        let ev = |text: &str| Evidence {
            id: Some(text.to_string()),
            source: EvidenceSource::Resume,
            strength: EvidenceStrength::Weak,
            confidence: 50,
            claim: String::new(),
            original_text: text.to_string(),
            source_details: None,
        };
        let data = ProfileData {
            skills: vec![SkillAssessment {
                name: "rust".to_string(),
                evidence: vec![ev("a")],
                ..Default::default()
            }],
            leadership: SubAssessment {
                evidence: vec![ev("b")],
                ..Default::default()
            },
            evidence_log: vec![ev("a"), ev("b"), ev("c")],
            ..Default::default()
        };
        let ids: Vec<_> = data
            .historical_evidence()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"], "linked items are not counted twice");

        let unlogged = ProfileData {
            evidence_log: Vec::new(),
            ..data
        };
        assert_eq!(unlogged.historical_evidence().len(), 2);
    }
}
