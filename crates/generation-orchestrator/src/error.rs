use std::fmt;

use ingestion_validation::ValidationError;
use runtime_admission::AdmissionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workflow stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Request,
    Admission,
    Generation,
    Parsing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Request => "request",
            Self::Admission => "admission",
            Self::Generation => "generation",
            Self::Parsing => "parsing",
        };
        f.write_str(label)
    }
}

/// Failures reported to callers of the generation workflows.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("invalid request: {detail}")]
    InvalidRequest { detail: String },
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("external service failure during {stage}: {detail}")]
    ExternalServiceFailure { stage: Stage, detail: String },
    #[error("malformed response during {stage}: {detail}")]
    MalformedResponse { stage: Stage, detail: String },
    #[error("generation service closed")]
    Closed,
}

impl OrchestratorError {
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::InvalidRequest { .. } => Stage::Request,
            Self::RateLimitExceeded { .. } | Self::Closed => Stage::Admission,
            Self::ExternalServiceFailure { stage, .. } | Self::MalformedResponse { stage, .. } => {
                *stage
            }
        }
    }

    /// Map the error onto an HTTP-like status for the embedding transport.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::RateLimitExceeded { .. } => 429,
            Self::ExternalServiceFailure { .. } | Self::MalformedResponse { .. } => 502,
            Self::Closed => 503,
        }
    }

    /// Retry-after hint, present only for rate limiting.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<AdmissionError> for OrchestratorError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::RateLimitExceeded { retry_after_secs } => {
                Self::RateLimitExceeded { retry_after_secs }
            }
            AdmissionError::Closed => Self::Closed,
            AdmissionError::Misconfigured(detail) => Self::ExternalServiceFailure {
                stage: Stage::Admission,
                detail,
            },
        }
    }
}

impl From<ValidationError> for OrchestratorError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MalformedResponse(detail) => Self::MalformedResponse {
                stage: Stage::Parsing,
                detail,
            },
        }
    }
}
