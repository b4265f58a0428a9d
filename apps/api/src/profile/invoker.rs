//! Analysis Invoker: one external analysis call with a per-attempt timeout,
//! bounded linear-backoff retries, schema validation, and usage telemetry.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::llm_client::{strip_json_fences, CompletionProvider, CompletionRequest, LlmError, TokenUsage};

pub const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub attempt_timeout: Duration,
    /// Extra attempts after the first.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_step * n`.
    pub backoff_step: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(90),
            max_retries: MAX_RETRIES,
            backoff_step: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    Timeout,
    Transport,
    Rejected,
    Schema,
    Exhausted,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis transport failure: {0}")]
    Transport(#[source] LlmError),

    #[error("analysis request rejected: {0}")]
    Rejected(#[source] LlmError),

    #[error("analysis result failed schema validation: {0}")]
    Schema(String),

    #[error("analysis failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<AnalysisError>,
    },
}

impl AnalysisError {
    pub fn kind(&self) -> AnalysisErrorKind {
        match self {
            AnalysisError::Timeout(_) => AnalysisErrorKind::Timeout,
            AnalysisError::Transport(_) => AnalysisErrorKind::Transport,
            AnalysisError::Rejected(_) => AnalysisErrorKind::Rejected,
            AnalysisError::Schema(_) => AnalysisErrorKind::Schema,
            AnalysisError::Exhausted { .. } => AnalysisErrorKind::Exhausted,
        }
    }

    /// The underlying failure, looking through `Exhausted`.
    pub fn root_cause(&self) -> &AnalysisError {
        match self {
            AnalysisError::Exhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Timeout(_) | AnalysisError::Transport(_))
    }
}

/// A structured result the model must return.
pub trait AnalysisPayload: DeserializeOwned + Send {
    /// Semantic checks serde cannot express (ranges, non-empty fields).
    fn validate(&self) -> Result<(), String>;
}

// ────────────────────────────────────────────────────────────────────────────
// Usage telemetry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub operation: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub success: bool,
    pub latency_ms: u64,
    pub retry_count: u32,
}

/// Fire-and-forget usage sink. Implementations must not block and must swallow
/// their own failures.
pub trait UsageTracker: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// Writes usage to the log at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageTracker;

impl UsageTracker for TracingUsageTracker {
    fn record(&self, record: UsageRecord) {
        let usage = record.usage.unwrap_or_default();
        debug!(
            operation = %record.operation,
            model = %record.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            success = record.success,
            latency_ms = record.latency_ms,
            retry_count = record.retry_count,
            "analysis usage"
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Invoker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AnalysisInvoker {
    provider: Arc<dyn CompletionProvider>,
    usage: Arc<dyn UsageTracker>,
    config: InvokerConfig,
}

impl AnalysisInvoker {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        usage: Arc<dyn UsageTracker>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            provider,
            usage,
            config,
        }
    }

    /// Runs the request until it yields a valid `T`, a terminal error, or the
    /// retry budget is spent.
    ///
    /// Timeouts and transient transport failures are retried. Schema violations
    /// and rejected requests end the call immediately.
    pub async fn invoke<T: AnalysisPayload>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, AnalysisError> {
        let mut last_error: Option<AnalysisError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.backoff_step * attempt;
                warn!(
                    operation = %request.operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "analysis attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let outcome =
                tokio::time::timeout(self.config.attempt_timeout, self.provider.complete(request))
                    .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let completion = match outcome {
                Err(_) => {
                    self.report(request, None, false, latency_ms, attempt);
                    last_error = Some(AnalysisError::Timeout(self.config.attempt_timeout));
                    continue;
                }
                Ok(Err(err)) if err.is_transient() => {
                    self.report(request, None, false, latency_ms, attempt);
                    last_error = Some(AnalysisError::Transport(err));
                    continue;
                }
                Ok(Err(err)) => {
                    self.report(request, None, false, latency_ms, attempt);
                    return Err(AnalysisError::Rejected(err));
                }
                Ok(Ok(completion)) => completion,
            };

            return match parse_payload::<T>(&completion.content) {
                Ok(payload) => {
                    self.report(request, Some(completion.usage), true, latency_ms, attempt);
                    Ok(payload)
                }
                Err(reason) => {
                    self.report(request, Some(completion.usage), false, latency_ms, attempt);
                    Err(AnalysisError::Schema(reason))
                }
            };
        }

        let attempts = self.config.max_retries + 1;
        let last = last_error.unwrap_or(AnalysisError::Timeout(self.config.attempt_timeout));
        Err(AnalysisError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }

    fn report(
        &self,
        request: &CompletionRequest,
        usage: Option<TokenUsage>,
        success: bool,
        latency_ms: u64,
        retry_count: u32,
    ) {
        self.usage.record(UsageRecord {
            operation: request.operation.clone(),
            model: request.model.clone(),
            usage,
            success,
            latency_ms,
            retry_count,
        });
    }
}

fn parse_payload<T: AnalysisPayload>(content: &str) -> Result<T, String> {
    let payload: T =
        serde_json::from_str(strip_json_fences(content)).map_err(|e| e.to_string())?;
    payload.validate()?;
    Ok(payload)
}
