//! Evidence Aggregator: merges historical and new evidence, removes duplicates,
//! and surfaces resume claims that interview evidence speaks against.
//!
//! Contradiction detection groups evidence by the first `CLAIM_PREFIX_CHARS`
//! characters of the normalized claim. It is a prefix heuristic with no
//! semantic understanding: a group holding both resume and interview evidence is
//! reported, whether or not the two sides actually disagree.

use std::collections::{HashMap, HashSet};


use crate::profile::evidence::{content_hash, normalize_text};
use crate::profile::models::{Contradiction, Evidence, EvidenceSource, Precedence};

pub const CLAIM_PREFIX_CHARS: usize = 50;

/// Claims listed in the prompt summary, highest confidence first.
const MAX_SUMMARY_CLAIMS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct AggregatedEvidence {
    /// Historical followed by new, duplicates included.
    pub all: Vec<Evidence>,
    /// First-seen order, duplicates removed.
    pub deduped: Vec<Evidence>,
    pub contradictions: Vec<Contradiction>,
}

#[derive(Debug, Clone)]
pub struct ClaimSummary {
    pub claim: String,
    pub confidence: f64,
    pub evidence_count: usize,
    pub sources: Vec<EvidenceSource>,
}

pub fn aggregate(historical: Vec<Evidence>, new: Vec<Evidence>) -> AggregatedEvidence {
    let mut all = historical;
    all.extend(new);
    let deduped = dedupe(&all);
    let contradictions = detect_contradictions(&deduped);
    AggregatedEvidence {
        all,
        deduped,
        contradictions,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Deduplication
// ────────────────────────────────────────────────────────────────────────────

/// Content key over the normalized `(source, strength, confidence, original_text)` tuple.
pub fn dedup_key(evidence: &Evidence) -> String {
    content_hash(&format!(
        "{}|{}|{}|{}",
        evidence.source.as_str(),
        evidence.strength.as_str(),
        evidence.confidence,
        normalize_text(&evidence.original_text)
    ))
}

/// Removes duplicates in one pass, keeping the first occurrence.
///
/// An item is a duplicate when its `id` was already seen, or when its content
/// key was already seen.
pub fn dedupe(items: &[Evidence]) -> Vec<Evidence> {
    let mut seen_ids: HashSet<&str> = HashSet::with_capacity(items.len());
    let mut seen_content: HashSet<String> = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        if let Some(id) = item.id.as_deref() {
            if seen_ids.contains(id) {
                continue;
            }
        }
        if !seen_content.insert(dedup_key(item)) {
            continue;
        }
        if let Some(id) = item.id.as_deref() {
            seen_ids.insert(id);
        }
        out.push(item.clone());
    }

    out
}

// ────────────────────────────────────────────────────────────────────────────
// Contradictions
// ────────────────────────────────────────────────────────────────────────────

/// Grouping key: the first `CLAIM_PREFIX_CHARS` characters of the normalized
/// claim, or of the text when no claim was recorded.
pub fn claim_key(evidence: &Evidence) -> String {
    let basis = if evidence.claim.trim().is_empty() {
        &evidence.original_text
    } else {
        &evidence.claim
    };
    normalize_text(basis).chars().take(CLAIM_PREFIX_CHARS).collect()
}

/// Emits one contradiction per claim group that holds both claimed (resume) and
/// verified (interview) evidence. The strongest item of each side is named.
pub fn detect_contradictions(items: &[Evidence]) -> Vec<Contradiction> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Evidence>> = HashMap::new();
    for item in items {
        let key = claim_key(item);
        if key.is_empty() {
            continue;
        }
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(item);
    }

    let mut contradictions = Vec::new();
    for key in order {
        let group = &groups[&key];
        let claimed = strongest(group.iter().copied().filter(|e| !e.source.is_verified()));
        let verified = strongest(group.iter().copied().filter(|e| e.source.is_verified()));
        let (Some(claimed), Some(verified)) = (claimed, verified) else {
            continue;
        };

        // Interview evidence wins unless the resume side is strictly stronger.
        let precedence = if verified.strength >= claimed.strength {
            Precedence::Verified
        } else {
            Precedence::Claimed
        };

        contradictions.push(Contradiction {
            claim_key: key,
            claimed: claimed.clone(),
            verified: verified.clone(),
            precedence,
        });
    }
    contradictions
}

fn strongest<'a>(items: impl Iterator<Item = &'a Evidence>) -> Option<&'a Evidence> {
    items.fold(None, |best: Option<&Evidence>, item| match best {
        Some(b) if (b.strength, b.confidence) >= (item.strength, item.confidence) => Some(b),
        _ => Some(item),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Confidence
// ────────────────────────────────────────────────────────────────────────────

/// Strength-weighted mean of individual confidences (0 – 100).
/// Returns `None` for an empty slice.
pub fn aggregate_confidence<'a>(items: impl IntoIterator<Item = &'a Evidence>) -> Option<f64> {
    let (weighted, weights) = items.into_iter().fold((0.0_f64, 0.0_f64), |(sum, w), e| {
        let weight = e.strength.weight();
        (sum + weight * f64::from(e.confidence), w + weight)
    });
    (weights > 0.0).then(|| weighted / weights)
}

/// Evidence whose claim key matches `claim`.
pub fn evidence_for_claim(items: &[Evidence], claim: &str) -> Vec<Evidence> {
    let key: String = normalize_text(claim).chars().take(CLAIM_PREFIX_CHARS).collect();
    items
        .iter()
        .filter(|e| claim_key(e) == key)
        .cloned()
        .collect()
}

pub fn claim_summaries(items: &[Evidence]) -> Vec<ClaimSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Evidence>> = HashMap::new();
    for item in items {
        let key = claim_key(item);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(item);
    }

    let mut summaries: Vec<ClaimSummary> = order
        .into_iter()
        .map(|claim| {
            let group = &groups[&claim];
            let mut sources: Vec<EvidenceSource> = Vec::new();
            for e in group {
                if !sources.contains(&e.source) {
                    sources.push(e.source);
                }
            }
            ClaimSummary {
                confidence: aggregate_confidence(group.iter().copied()).unwrap_or(0.0),
                evidence_count: group.len(),
                sources,
                claim,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    summaries
}

/// Compact plain-text rendering used as the evidence part of the analysis prompt.
pub fn render_summary(aggregated: &AggregatedEvidence) -> String {
    let deduped = &aggregated.deduped;
    if deduped.is_empty() {
        return "No evidence recorded yet.".to_string();
    }

    let verified = deduped.iter().filter(|e| e.source.is_verified()).count();
    let mut out = format!(
        "Evidence: {} items ({} verified, {} claimed, {} duplicates removed)\n",
        deduped.len(),
        verified,
        deduped.len() - verified,
        aggregated.all.len() - deduped.len()
    );

    out.push_str("Claims:\n");
    for summary in claim_summaries(deduped).iter().take(MAX_SUMMARY_CLAIMS) {
        let sources = summary
            .sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "- {}: confidence {:.0} ({} items; {})\n",
            summary.claim, summary.confidence, summary.evidence_count, sources
        ));
    }

    if !aggregated.contradictions.is_empty() {
        out.push_str("Contradictions:\n");
        for c in &aggregated.contradictions {
            out.push_str(&format!(
                "- {}: resume says \"{}\" but {} says \"{}\"; prefer {}\n",
                c.claim_key,
                c.claimed.original_text,
                c.verified.source.as_str(),
                c.verified.original_text,
                c.preferred().source.as_str()
            ));
        }
    }

    out
}
