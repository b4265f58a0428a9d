use std::time::Duration;

use thiserror::Error;

use crate::profile::budget::BudgetError;
use crate::profile::invoker::{AnalysisError, AnalysisErrorKind};
use crate::profile::store::StoreError;

/// How a failed profile update should be treated by callers and by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fix the input and resubmit. Never retried.
    Validation,
    /// Safe to retry shortly. Releases the update lock immediately.
    Transient,
    /// Retrying soon will fail again. The update lock is held for a cooldown.
    Persistent,
    /// A joiner gave up waiting on an in-flight update.
    WaitTimeout,
}

/// Error returned by a profile update. `Clone` so one owner outcome can be
/// handed to every joiner waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ProfileError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),

    #[error("persistent failure: {0}")]
    Persistent(String),

    #[error("timed out after {waited:?} waiting on in-flight update '{key}' (possible deadlock)")]
    WaitTimeout { key: String, waited: Duration },
}

impl ProfileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProfileError::Validation(_) | ProfileError::NotFound(_) => ErrorKind::Validation,
            ProfileError::TransientInfra(_) => ErrorKind::Transient,
            ProfileError::Persistent(_) => ErrorKind::Persistent,
            ProfileError::WaitTimeout { .. } => ErrorKind::WaitTimeout,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<AnalysisError> for ProfileError {
    fn from(err: AnalysisError) -> Self {
        match err.kind() {
            AnalysisErrorKind::Timeout | AnalysisErrorKind::Transport => {
                ProfileError::TransientInfra(err.to_string())
            }
            AnalysisErrorKind::Exhausted => {
                // Retries ran out; what matters is whether the last failure was transient.
                if err.root_cause().is_transient() {
                    ProfileError::TransientInfra(err.to_string())
                } else {
                    ProfileError::Persistent(err.to_string())
                }
            }
            AnalysisErrorKind::Schema | AnalysisErrorKind::Rejected => {
                ProfileError::Persistent(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ProfileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => ProfileError::Persistent(err.to_string()),
            StoreError::Unavailable(_) => ProfileError::TransientInfra(err.to_string()),
            StoreError::Backend(_) => ProfileError::Persistent(err.to_string()),
        }
    }
}

impl From<BudgetError> for ProfileError {
    fn from(err: BudgetError) -> Self {
        ProfileError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_timeouts_are_transient() {
        let err = AnalysisError::Exhausted {
            attempts: 3,
            last: Box::new(AnalysisError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(ProfileError::from(err).kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_schema_failure_is_persistent() {
        let err = AnalysisError::Schema("missing field `overall_score`".to_string());
        assert_eq!(ProfileError::from(err).kind(), ErrorKind::Persistent);
    }

    #[test]
    fn test_store_unavailable_is_transient() {
        let err = StoreError::Unavailable("pool timed out".to_string());
        assert!(ProfileError::from(err).is_transient());
    }

    #[test]
    fn test_not_found_is_a_validation_kind() {
        assert_eq!(
            ProfileError::NotFound("candidate".to_string()).kind(),
            ErrorKind::Validation
        );
    }
}
