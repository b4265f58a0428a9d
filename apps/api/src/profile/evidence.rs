//! Evidence Extractor: turns a raw source into atomic `Evidence` items.
//!
//! Resume lines become candidate-claimed evidence; interview feedback becomes
//! interviewer-verified evidence. Every item is tagged with a normalized claim
//! (`skill: rust`, `leadership: team management`, …) so the aggregator can group
//! statements about the same thing.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::profile::models::{
    Evidence, EvidenceSource, EvidenceStrength, InterviewFeedback, SourceDetails,
};

/// Lines shorter than this carry too little to be evidence.
const MIN_EVIDENCE_CHARS: usize = 12;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{0} is empty")]
    EmptySource(&'static str),

    #[error("malformed {source_name}: {reason}")]
    Malformed {
        source_name: &'static str,
        reason: String,
    },
}

const LEADERSHIP_MARKERS: &[&str] = &[
    "manag",
    " led ",
    " leads ",
    " leading ",
    "mentor",
    "supervis",
    "direct report",
    "team of",
    "people lead",
];

const COMMUNICATION_MARKERS: &[&str] = &[
    "communicat",
    "presented",
    "presentation",
    "stakeholder",
    "explain",
    "articulat",
];

const COLLABORATION_MARKERS: &[&str] = &[
    "collaborat",
    "teamwork",
    "cross-functional",
    "pair programming",
    "partnered",
];

const SKILL_LIST_PREFIXES: &[&str] = &["skills:", "technical skills:", "technologies:", "tech stack:"];

// ────────────────────────────────────────────────────────────────────────────
// Normalization helpers (shared with the aggregator)
// ────────────────────────────────────────────────────────────────────────────

/// Lowercases, collapses whitespace, and trims surrounding punctuation.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

/// Hex SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Maps free text onto the statement it speaks to.
///
/// Keyword driven: leadership, then known skills, then communication,
/// collaboration, tenure. Anything else falls back to its first words.
pub fn derive_claim(text: &str, known_skills: &[String]) -> String {
    let lower = normalize_text(text);
    let padded = format!(" {lower} ");

    if LEADERSHIP_MARKERS.iter().any(|m| padded.contains(m)) {
        return "leadership: team management".to_string();
    }

    for skill in known_skills {
        let skill = normalize_text(skill);
        if !skill.is_empty() && contains_word(&lower, &skill) {
            return format!("skill: {skill}");
        }
    }

    if COMMUNICATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return "communication".to_string();
    }
    if COLLABORATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return "collaboration".to_string();
    }
    if lower.contains("years") && lower.chars().any(|c| c.is_ascii_digit()) {
        return "experience: tenure".to_string();
    }

    let head = lower.split_whitespace().take(6).collect::<Vec<_>>().join(" ");
    format!("general: {head}")
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + needle.len()..].chars().next();
        let is_boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
        is_boundary(before) && is_boundary(after)
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Resume extraction
// ────────────────────────────────────────────────────────────────────────────

/// The part after a `Skills:` style prefix. Prefixes are ASCII, so the match
/// is done on the original bytes and the slice always lands on a char boundary.
fn skill_list_body(line: &str) -> Option<&str> {
    SKILL_LIST_PREFIXES.iter().find_map(|prefix| {
        line.get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &line[prefix.len()..])
    })
}

/// Skill names listed on `Skills:` style lines.
pub fn listed_skills(resume_text: &str) -> Vec<String> {
    let mut skills = Vec::new();
    for line in resume_text.lines() {
        if let Some(body) = skill_list_body(strip_bullet(line)) {
            skills.extend(
                body.split([',', ';', '|'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
    }
    skills
}

/// Extracts claimed evidence from resume text.
///
/// Quantified lines (containing a digit) are `moderate`; the rest are `weak`.
/// Listed skills become one `weak` item each.
pub fn extract_from_resume(
    resume_text: &str,
    known_skills: &[String],
) -> Result<Vec<Evidence>, ExtractionError> {
    if resume_text.trim().is_empty() {
        return Err(ExtractionError::EmptySource("resume text"));
    }

    let mut evidence = Vec::new();
    let mut section: Option<String> = None;

    for line in resume_text.lines() {
        let cleaned = strip_bullet(line);
        if cleaned.is_empty() {
            continue;
        }

        if let Some(body) = skill_list_body(cleaned) {
            for skill in body
                .split([',', ';', '|'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                let text = format!("Listed skill: {skill}");
                evidence.push(resume_evidence(
                    text,
                    format!("skill: {}", normalize_text(skill)),
                    EvidenceStrength::Weak,
                    40,
                    Some("skills".to_string()),
                ));
            }
            continue;
        }

        if is_section_header(cleaned) {
            section = Some(normalize_text(cleaned));
            continue;
        }

        if cleaned.chars().count() < MIN_EVIDENCE_CHARS {
            continue;
        }

        let quantified = cleaned.chars().any(|c| c.is_ascii_digit());
        let (strength, confidence) = if quantified {
            (EvidenceStrength::Moderate, 60)
        } else {
            (EvidenceStrength::Weak, 45)
        };
        evidence.push(resume_evidence(
            cleaned.to_string(),
            derive_claim(cleaned, known_skills),
            strength,
            confidence,
            section.clone(),
        ));
    }

    Ok(evidence)
}

fn resume_evidence(
    text: String,
    claim: String,
    strength: EvidenceStrength,
    confidence: u8,
    section: Option<String>,
) -> Evidence {
    let hash = content_hash(&text);
    Evidence {
        id: Some(format!("resume:{}", &hash[..16])),
        source: EvidenceSource::Resume,
        strength,
        confidence,
        claim,
        original_text: text,
        source_details: section.map(|section| SourceDetails {
            section: Some(section),
            ..Default::default()
        }),
    }
}

fn strip_bullet(line: &str) -> &str {
    let trimmed = line.trim();
    let trimmed = trimmed.trim_start_matches(['-', '*', '•', '·', '–']).trim_start();
    // numbered bullets: "1." / "2)"
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits < 3 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    trimmed
}

fn is_section_header(line: &str) -> bool {
    if line.len() > 40 {
        return false;
    }
    if line.ends_with(':') && !line.contains(' ') {
        return true;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase())
}

// ────────────────────────────────────────────────────────────────────────────
// Interview feedback extraction
// ────────────────────────────────────────────────────────────────────────────

/// Extracts verified evidence from a completed interview's feedback.
pub fn extract_from_feedback(
    feedback: &InterviewFeedback,
    known_skills: &[String],
) -> Result<Vec<Evidence>, ExtractionError> {
    let notes = feedback.notes.as_deref().unwrap_or("").trim();
    if feedback.skill_ratings.is_empty()
        && feedback.strengths.is_empty()
        && feedback.concerns.is_empty()
        && feedback.behavioral_observations.is_empty()
        && notes.is_empty()
    {
        return Err(ExtractionError::EmptySource("interview feedback"));
    }

    if let Some(bad) = feedback
        .skill_ratings
        .iter()
        .find(|r| !(1..=5).contains(&r.rating))
    {
        return Err(ExtractionError::Malformed {
            source_name: "interview feedback",
            reason: format!("skill '{}' rated {} (expected 1-5)", bad.skill, bad.rating),
        });
    }

    let mut evidence = Vec::new();
    let mut push = |section: &'static str,
                    idx: usize,
                    source: EvidenceSource,
                    strength: EvidenceStrength,
                    confidence: u8,
                    claim: String,
                    text: String| {
        evidence.push(Evidence {
            id: Some(format!("interview:{}:{section}:{idx}", feedback.interview_id)),
            source,
            strength,
            confidence,
            claim,
            original_text: text,
            source_details: Some(SourceDetails {
                interview_id: Some(feedback.interview_id),
                section: Some(section.to_string()),
                timestamp: feedback.completed_at,
            }),
        });
    };

    for (idx, rating) in feedback.skill_ratings.iter().enumerate() {
        let comment = rating.comment.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let (strength, confidence, text) = match comment {
            Some(comment) => (
                EvidenceStrength::Direct,
                85,
                format!("{} rated {}/5: {comment}", rating.skill, rating.rating),
            ),
            None => (
                EvidenceStrength::Strong,
                75,
                format!("{} rated {}/5", rating.skill, rating.rating),
            ),
        };
        push(
            "skill_ratings",
            idx,
            EvidenceSource::InterviewFeedback,
            strength,
            confidence,
            format!("skill: {}", normalize_text(&rating.skill)),
            text,
        );
    }

    for (idx, text) in feedback.strengths.iter().enumerate() {
        push(
            "strengths",
            idx,
            EvidenceSource::InterviewFeedback,
            EvidenceStrength::Strong,
            75,
            derive_claim(text, known_skills),
            text.trim().to_string(),
        );
    }

    for (idx, text) in feedback.concerns.iter().enumerate() {
        push(
            "concerns",
            idx,
            EvidenceSource::InterviewFeedback,
            EvidenceStrength::Strong,
            75,
            derive_claim(text, known_skills),
            text.trim().to_string(),
        );
    }

    for (idx, text) in feedback.behavioral_observations.iter().enumerate() {
        push(
            "behavioral",
            idx,
            EvidenceSource::BehavioralObservation,
            EvidenceStrength::Moderate,
            70,
            derive_claim(text, known_skills),
            text.trim().to_string(),
        );
    }

    for (idx, sentence) in split_sentences(notes)
        .into_iter()
        .filter(|s| s.chars().count() >= MIN_EVIDENCE_CHARS)
        .enumerate()
    {
        push(
            "notes",
            idx,
            EvidenceSource::InterviewerNotes,
            EvidenceStrength::Moderate,
            60,
            derive_claim(sentence, known_skills),
            sentence.to_string(),
        );
    }

    Ok(evidence)
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
