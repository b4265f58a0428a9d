// Prompt fragments shared by every analysis operation.
// Operation-specific templates live next to their callers (see profile/prompts.rs).

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Common instruction appended to all assessment prompts.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every assessment you make must be traceable to the evidence provided \
    in the context. Do NOT infer, interpolate, or invent experience the candidate \
    has not shown. If the evidence does not support a conclusion, say it is unverified.";

/// Instruction for weighing claimed versus observed evidence.
pub const PRECEDENCE_INSTRUCTION: &str = "\
    CRITICAL: Interview observations outrank resume claims of equal or lower strength. \
    When the evidence summary lists a contradiction, follow the preferred side and \
    record the disagreement as a concern. Never upgrade a claim the interviews contradicted.";
