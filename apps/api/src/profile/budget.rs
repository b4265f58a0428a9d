//! Prompt Budgeter: keeps analysis prompt inputs under a token ceiling.
//!
//! Token counts are estimates (`CHARS_PER_TOKEN` characters per token), not the
//! provider's tokenizer. Callers must treat the result as "at most the ceiling".
//!
//! Order of degradation:
//! 1. truncate every part to its own sub-ceiling;
//! 2. if the sum is still over, drop one optional part (transcript, then
//!    feedback, then notes) and run the pass again;
//! 3. if still over, drop the remaining optional parts and shrink the rest
//!    proportionally, never below each part's minimum viable size.
//!
//! Only when the minimum viable sizes alone exceed the ceiling does `fit` fail.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

pub const CHARS_PER_TOKEN: usize = 4;
pub const TRUNCATION_MARKER: &str = "\n[...truncated]";
pub const MAX_HISTORY_ROUNDS: usize = 5;

/// A sentence/line boundary is only used when it keeps at least this share of the limit.
const BOUNDARY_MIN_FRACTION: f64 = 0.8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("prompt inputs need at least {required} tokens but the ceiling is {ceiling}")]
    InputTooLarge { required: usize, ceiling: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Transcript,
    Feedback,
    Notes,
    JobDescription,
    History,
    EvidenceSummary,
    PriorProfile,
    Resume,
}

impl PartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Transcript => "transcript",
            PartKind::Feedback => "feedback",
            PartKind::Notes => "notes",
            PartKind::JobDescription => "job_description",
            PartKind::History => "history",
            PartKind::EvidenceSummary => "evidence_summary",
            PartKind::PriorProfile => "prior_profile",
            PartKind::Resume => "resume",
        }
    }

    /// Default per-part ceiling, in estimated tokens.
    pub fn default_sub_ceiling(&self) -> usize {
        match self {
            PartKind::Transcript => 4000,
            PartKind::Feedback => 2000,
            PartKind::Notes => 1000,
            PartKind::JobDescription => 1000,
            PartKind::History => 800,
            PartKind::EvidenceSummary => 1500,
            PartKind::PriorProfile => 1500,
            PartKind::Resume => 3000,
        }
    }

    /// Smallest useful size for a required part.
    pub fn min_viable(&self) -> usize {
        match self {
            PartKind::Transcript | PartKind::Feedback | PartKind::Notes => 0,
            PartKind::History => 50,
            PartKind::JobDescription | PartKind::EvidenceSummary | PartKind::PriorProfile => 100,
            PartKind::Resume => 200,
        }
    }

    /// Position in the drop order; `None` for parts that are never dropped.
    fn drop_rank(&self) -> Option<u8> {
        match self {
            PartKind::Transcript => Some(0),
            PartKind::Feedback => Some(1),
            PartKind::Notes => Some(2),
            _ => None,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.drop_rank().is_some()
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedText {
    pub kind: PartKind,
    pub text: String,
}

impl NamedText {
    pub fn new(kind: PartKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn total_tokens(parts: &[NamedText]) -> usize {
    parts.iter().map(NamedText::estimated_tokens).sum()
}

// ────────────────────────────────────────────────────────────────────────────
// Budgeter
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PromptBudgeter {
    ceiling: usize,
    sub_ceilings: HashMap<PartKind, usize>,
}

impl PromptBudgeter {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            sub_ceilings: HashMap::new(),
        }
    }

    pub fn with_sub_ceiling(mut self, kind: PartKind, tokens: usize) -> Self {
        self.sub_ceilings.insert(kind, tokens);
        self
    }

    pub fn sub_ceiling(&self, kind: PartKind) -> usize {
        self.sub_ceilings
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_sub_ceiling())
    }

    pub fn fit(&self, parts: Vec<NamedText>) -> Result<Vec<NamedText>, BudgetError> {
        let mut fitted = self.truncate_pass(parts);
        if total_tokens(&fitted) <= self.ceiling {
            return Ok(fitted);
        }

        // One retry without the most expensive optional part.
        if let Some(idx) = fitted
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| p.kind.drop_rank().map(|rank| (rank, idx)))
            .min()
            .map(|(_, idx)| idx)
        {
            let dropped = fitted.remove(idx);
            debug!(
                part = %dropped.kind,
                tokens = dropped.estimated_tokens(),
                "prompt over budget, dropping optional part"
            );
            fitted = self.truncate_pass(fitted);
            if total_tokens(&fitted) <= self.ceiling {
                return Ok(fitted);
            }
        }

        self.shrink_to_ceiling(fitted)
    }

    fn truncate_pass(&self, parts: Vec<NamedText>) -> Vec<NamedText> {
        parts
            .into_iter()
            .map(|part| {
                let limit = self.sub_ceiling(part.kind);
                NamedText {
                    text: truncate_text(&part.text, limit),
                    kind: part.kind,
                }
            })
            .collect()
    }

    /// Last-resort configuration: required parts only, each shrunk towards its
    /// minimum viable size in proportion to how much it exceeds it.
    fn shrink_to_ceiling(&self, parts: Vec<NamedText>) -> Result<Vec<NamedText>, BudgetError> {
        let required: Vec<NamedText> = parts.into_iter().filter(|p| !p.kind.is_optional()).collect();

        let sizes: Vec<usize> = required.iter().map(NamedText::estimated_tokens).collect();
        let floors: Vec<usize> = required
            .iter()
            .zip(&sizes)
            .map(|(p, size)| p.kind.min_viable().min(*size))
            .collect();
        let floor_total: usize = floors.iter().sum();
        if floor_total > self.ceiling {
            return Err(BudgetError::InputTooLarge {
                required: floor_total,
                ceiling: self.ceiling,
            });
        }

        let remaining = self.ceiling - floor_total;
        let deficits: Vec<usize> = sizes.iter().zip(&floors).map(|(s, f)| s - f).collect();
        let deficit_total: usize = deficits.iter().sum();

        let shrunk = required
            .into_iter()
            .zip(floors.iter().zip(&deficits))
            .map(|(part, (floor, deficit))| {
                let extra = if deficit_total == 0 {
                    0
                } else {
                    // floor division keeps the allocations' sum within `remaining`
                    ((*deficit as u128 * remaining as u128) / deficit_total as u128) as usize
                };
                NamedText {
                    text: truncate_text(&part.text, floor + extra),
                    kind: part.kind,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            ceiling = self.ceiling,
            tokens = total_tokens(&shrunk),
            "prompt shrunk to degraded configuration"
        );
        Ok(shrunk)
    }
}

/// Convenience wrapper using default sub-ceilings.
pub fn fit(parts: Vec<NamedText>, ceiling: usize) -> Result<Vec<NamedText>, BudgetError> {
    PromptBudgeter::new(ceiling).fit(parts)
}

// ────────────────────────────────────────────────────────────────────────────
// Truncation
// ────────────────────────────────────────────────────────────────────────────

/// Cuts `text` so its estimate is at most `max_tokens`.
///
/// Prefers the last sentence end or newline inside the limit when that keeps
/// more than 80% of it; otherwise hard-cuts and appends `TRUNCATION_MARKER`.
pub fn truncate_text(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let window_end = byte_offset(text, max_chars);
    let window = &text[..window_end];

    let mut boundary: Option<(usize, usize)> = None; // (chars kept, byte end)
    for (chars_before, (byte_idx, c)) in window.char_indices().enumerate() {
        match c {
            '.' | '!' | '?' => boundary = Some((chars_before + 1, byte_idx + c.len_utf8())),
            '\n' => boundary = Some((chars_before, byte_idx)),
            _ => {}
        }
    }
    if let Some((kept, byte_end)) = boundary {
        if kept as f64 > max_chars as f64 * BOUNDARY_MIN_FRACTION {
            return window[..byte_end].to_string();
        }
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return window.to_string();
    }
    let keep_end = byte_offset(text, max_chars - marker_chars);
    format!("{}{}", &text[..keep_end], TRUNCATION_MARKER)
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

// ────────────────────────────────────────────────────────────────────────────
// Interview history
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub round: u32,
    pub interview_type: String,
    pub rating: Option<u8>,
    pub recommendation: Option<String>,
}

impl RoundSummary {
    pub fn line(&self) -> String {
        let rating = self
            .rating
            .map(|r| format!("{r}/5"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Round {} ({}): rating {}, recommendation {}",
            self.round,
            self.interview_type,
            rating,
            self.recommendation.as_deref().unwrap_or("none")
        )
    }
}

/// One line per round. Over the limit, only the latest `MAX_HISTORY_ROUNDS`
/// are kept behind an omission marker.
pub fn compress_history(rounds: &[RoundSummary], max_tokens: usize) -> String {
    let mut rounds = rounds.to_vec();
    rounds.sort_by_key(|r| r.round);

    let full = rounds.iter().map(RoundSummary::line).collect::<Vec<_>>().join("\n");
    if estimate_tokens(&full) <= max_tokens {
        return full;
    }

    let omitted = rounds.len().saturating_sub(MAX_HISTORY_ROUNDS);
    let recent = rounds[omitted..]
        .iter()
        .map(RoundSummary::line)
        .collect::<Vec<_>>()
        .join("\n");
    let compressed = if omitted > 0 {
        format!("[{omitted} earlier rounds omitted]\n{recent}")
    } else {
        recent
    };
    truncate_text(&compressed, max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {i} talks about the work."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_truncation_prefers_sentence_boundary() {
        let text = sentence_text(20);
        let out = truncate_text(&text, 50);
        assert!(estimate_tokens(&out) <= 50);
        assert!(out.ends_with('.'), "expected a sentence cut, got {out:?}");
        assert!(!out.contains("[...truncated]"));
        assert!(out.chars().count() as f64 > 200.0 * 0.8);
    }

    #[test]
    fn test_truncation_hard_cuts_without_boundary() {
        let text = "x".repeat(1000);
        let out = truncate_text(&text, 20);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(estimate_tokens(&out) <= 20);
    }

    #[test]
    fn test_truncation_ignores_early_boundary() {
        // the only boundary sits at 10% of the limit
        let text = format!("Short one. {}", "y".repeat(500));
        let out = truncate_text(&text, 25);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let text = "é".repeat(500);
        let out = truncate_text(&text, 10);
        assert!(estimate_tokens(&out) <= 10);
    }

    #[test]
    fn test_fit_keeps_parts_that_already_fit() {
        let parts = vec![
            NamedText::new(PartKind::Feedback, "good"),
            NamedText::new(PartKind::EvidenceSummary, "evidence"),
        ];
        assert_eq!(fit(parts.clone(), 100).unwrap(), parts);
    }

    #[test]
    fn test_fit_drops_transcript_before_feedback() {
        let parts = vec![
            NamedText::new(PartKind::Feedback, "f".repeat(400)),
            NamedText::new(PartKind::Transcript, "t".repeat(4000)),
            NamedText::new(PartKind::EvidenceSummary, "e".repeat(400)),
        ];
        let out = fit(parts, 300).unwrap();
        assert!(out.iter().all(|p| p.kind != PartKind::Transcript));
        assert!(out.iter().any(|p| p.kind == PartKind::Feedback));
        assert!(total_tokens(&out) <= 300);
    }

    #[test]
    fn test_fit_applies_sub_ceilings() {
        let budgeter = PromptBudgeter::new(10_000).with_sub_ceiling(PartKind::Notes, 10);
        let out = budgeter
            .fit(vec![NamedText::new(PartKind::Notes, "n".repeat(400))])
            .unwrap();
        assert!(out[0].estimated_tokens() <= 10);
    }

    #[test]
    fn test_fit_degrades_to_ceiling() {
        let parts = vec![
            NamedText::new(PartKind::Transcript, "t".repeat(20_000)),
            NamedText::new(PartKind::Feedback, "f".repeat(8_000)),
            NamedText::new(PartKind::Notes, "n".repeat(4_000)),
            NamedText::new(PartKind::Resume, "r".repeat(12_000)),
            NamedText::new(PartKind::EvidenceSummary, "e".repeat(6_000)),
            NamedText::new(PartKind::History, "h".repeat(3_000)),
        ];
        let floors: usize = [PartKind::Resume, PartKind::EvidenceSummary, PartKind::History]
            .iter()
            .map(PartKind::min_viable)
            .sum();
        for ceiling in [floors, floors + 1, 700, 1_500, 4_000] {
            let out = fit(parts.clone(), ceiling).unwrap();
            assert!(
                total_tokens(&out) <= ceiling,
                "ceiling {ceiling} exceeded: {}",
                total_tokens(&out)
            );
        }
    }

    #[test]
    fn test_fit_fails_when_nothing_fits() {
        let parts = vec![
            NamedText::new(PartKind::Resume, "r".repeat(12_000)),
            NamedText::new(PartKind::PriorProfile, "p".repeat(6_000)),
        ];
        assert_eq!(
            fit(parts, 100),
            Err(BudgetError::InputTooLarge {
                required: 300,
                ceiling: 100
            })
        );
    }

    fn round(n: u32) -> RoundSummary {
        RoundSummary {
            round: n,
            interview_type: "technical".to_string(),
            rating: Some(4),
            recommendation: Some("hire".to_string()),
        }
    }

    #[test]
    fn test_history_one_line_per_round() {
        let history = compress_history(&[round(2), round(1)], 1_000);
        let lines: Vec<_> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Round 1 (technical): rating 4/5, recommendation hire"));
    }

    #[test]
    fn test_history_keeps_latest_five_when_over() {
        let rounds: Vec<_> = (1..=8).map(round).collect();
        let full_tokens = estimate_tokens(
            &rounds.iter().map(RoundSummary::line).collect::<Vec<_>>().join("\n"),
        );
        let history = compress_history(&rounds, full_tokens - 10);
        assert!(history.starts_with("[3 earlier rounds omitted]"));
        assert!(history.contains("Round 8"));
        assert!(!history.contains("Round 3 "));
        assert!(estimate_tokens(&history) <= full_tokens - 10);
    }
}
