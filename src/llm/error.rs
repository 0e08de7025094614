use reqwest::StatusCode;
use thiserror::Error;

use crate::core::http::{classify_status, classify_transport, truncate_body, FailureClass};

/// A single failed call against one endpoint, classified for retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("fatal provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate_body(body));
        match classify_status(status) {
            FailureClass::Transient => ProviderError::Transient(message),
            FailureClass::Fatal => ProviderError::Fatal(message),
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        match classify_transport(&err) {
            FailureClass::Transient => ProviderError::Transient(err.to_string()),
            FailureClass::Fatal => ProviderError::Fatal(err.to_string()),
        }
    }
}

/// Raised once the failover loop gives up.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("no generation endpoints available: {0}")]
    NoEndpoints(String),
    #[error("generation aborted after {attempts} attempt(s): {error}")]
    Aborted { attempts: usize, error: ProviderError },
    #[error("generation failed after {attempts} attempt(s), last error: {last}")]
    Exhausted { attempts: usize, last: ProviderError },
}

impl GenerationFailure {
    pub fn attempts(&self) -> usize {
        match self {
            GenerationFailure::NoEndpoints(_) => 0,
            GenerationFailure::Aborted { attempts, .. }
            | GenerationFailure::Exhausted { attempts, .. } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_carry_their_classification() {
        let err = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        assert!(err.to_string().contains("429"));

        let err = ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key");
        assert!(!err.is_transient());
    }

    #[test]
    fn attempts_are_reported() {
        let failure = GenerationFailure::Exhausted {
            attempts: 3,
            last: ProviderError::Transient("HTTP 429".into()),
        };
        assert_eq!(failure.attempts(), 3);
        assert!(failure.to_string().contains("HTTP 429"));
    }
}
