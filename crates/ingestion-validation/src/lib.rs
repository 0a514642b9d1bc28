//! Turns free-form generator output into verified structured records.
//!
//! Parsing is a pure function of the input text: strip an optional fence,
//! decode the JSON document, then enforce the schema of either a question
//! batch ([`parse_items`]) or a submission verdict ([`parse_outcome`]).

mod fence;
mod items;
mod outcome;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fence::{decode_payload, strip_fence};
pub use items::{parse_items, GeneratedItem, ItemOption, REQUIRED_OPTIONS};
pub use outcome::{parse_outcome, score_for, ValidationOutcome, Verdict};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Difficulty band requested for generated questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Basic,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// Map a loosely formatted label onto a band; unknown labels fall back to
    /// [`Difficulty::Intermediate`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "basic" | "easy" | "beginner" => Self::Basic,
            "advanced" | "hard" | "expert" => Self::Advanced,
            _ => Self::Intermediate,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}
