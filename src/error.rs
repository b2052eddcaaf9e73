//! Error taxonomy for the pipeline.
//!
//! The processing state machine only needs one bit from an error: retryable
//! or permanent. Transient failures (network, storage, rate limits) are
//! retryable; validation and not-found failures are permanent and fail the
//! document immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input or unsupported content. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced record or object does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// A failure that may succeed on a later attempt.
    #[error("transient error: {0}")]
    Transient(String),

    /// The retry budget for an operation ran out.
    #[error("operation failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// A concurrent actor changed state underneath us.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl PipelineError {
    /// Whether the processing state machine should schedule another attempt.
    ///
    /// An exhausted inner attempt budget (a collaborator's own retry loop)
    /// inherits the retryability of its cause: a transient outage that
    /// outlasts the inner attempts still gets the outer backoff schedule.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Transient(_) | PipelineError::Store(_) | PipelineError::Conflict(_) => {
                true
            }
            PipelineError::ExhaustedRetries { source, .. } => source.is_retryable(),
            PipelineError::Validation(_) | PipelineError::NotFound(_) => false,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(PipelineError::Transient("timeout".into()).is_retryable());
        assert!(PipelineError::Conflict("raced".into()).is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!PipelineError::Validation("bad file".into()).is_retryable());
        assert!(!PipelineError::NotFound("doc-1".into()).is_retryable());
    }

    #[test]
    fn exhausted_inherits_retryability_from_its_cause() {
        let transient = PipelineError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(PipelineError::Transient("index down".into())),
        };
        assert!(transient.is_retryable());

        let permanent = PipelineError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(PipelineError::Validation("bad payload".into())),
        };
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn exhausted_keeps_the_underlying_cause() {
        let err = PipelineError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(PipelineError::Transient("index down".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("index down"));
    }
}
