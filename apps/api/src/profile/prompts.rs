// LLM prompt templates for the profile engine.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, PRECEDENCE_INSTRUCTION};
use crate::profile::budget::NamedText;
use crate::profile::models::ProfileStage;

/// Telemetry label for the profile analysis call.
pub const ANALYSIS_OPERATION: &str = "profile_analysis";

pub const ANALYSIS_SYSTEM: &str = "\
You are a senior technical recruiter maintaining an evolving, evidence-backed \
assessment of a job candidate. You update the assessment each time new evidence \
arrives. Scores are 0-100. Be conservative: unverified resume claims never score \
above what the interviews support.";

/// Analysis prompt template.
/// Replace: {grounding_instruction}, {precedence_instruction}, {candidate_name},
///          {stage}, {sections}
pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"{grounding_instruction}

{precedence_instruction}

Update the assessment of candidate "{candidate_name}" for stage "{stage}".

{sections}

Return a JSON object with this EXACT schema (no extra fields):
{
  "profile_data": {
    "skills": [
      {"name": "Rust", "level": "expert" | "proficient" | "familiar" | "unverified", "confidence": 0-100}
    ],
    "experience": {"years_estimate": number | null, "summary": "string"},
    "cultural_fit": {"score": 0-100 | null, "notes": "string"},
    "leadership": {"score": 0-100 | null, "notes": "string"}
  },
  "overall_score": 0-100,
  "strengths": ["string"],
  "concerns": ["string"],
  "gaps": ["string"],
  "ai_summary": "2-4 sentence narrative"
}

Rules:
- Carry forward prior skills unless new evidence changes them.
- Every concern must cite the evidence it comes from.
- List job requirements with no supporting evidence under "gaps"."#;

/// Renders the fitted parts into the analysis prompt, one headed section each.
pub fn build_analysis_prompt(candidate_name: &str, stage: ProfileStage, parts: &[NamedText]) -> String {
    let sections = parts
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("## {}\n{}", p.kind.as_str().to_uppercase(), p.text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n");

    ANALYSIS_PROMPT_TEMPLATE
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{precedence_instruction}", PRECEDENCE_INSTRUCTION)
        .replace("{candidate_name}", candidate_name)
        .replace("{stage}", &stage.label())
        .replace("{sections}", &sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::budget::PartKind;

    #[test]
    fn test_prompt_contains_every_non_empty_part() {
        let parts = vec![
            NamedText::new(PartKind::EvidenceSummary, "Evidence: 3 items"),
            NamedText::new(PartKind::History, "  "),
            NamedText::new(PartKind::Feedback, "Rust rated 5/5"),
        ];
        let prompt = build_analysis_prompt("Ada", ProfileStage::AfterInterview(2), &parts);
        assert!(prompt.contains("after_interview_2"));
        assert!(prompt.contains("Evidence: 3 items"));
        assert!(prompt.contains("Rust rated 5/5"));
        assert!(!prompt.contains("## HISTORY"), "blank parts are skipped");
        assert!(!prompt.contains("{sections}"));
    }
}
