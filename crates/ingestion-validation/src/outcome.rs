use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fence::decode_payload;
use crate::ValidationError;

const DEGRADED_FEEDBACK: &str =
    "We could not evaluate this submission right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Incorrect,
    Error,
}

impl Verdict {
    fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Evaluation of a single submitted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub verdict: Verdict,
    pub score: u32,
    pub feedback: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub tests_passed: u32,
    #[serde(default)]
    pub tests_total: u32,
}

impl ValidationOutcome {
    /// Outcome reported when evaluation itself failed.
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            score: 0,
            feedback: DEGRADED_FEEDBACK.into(),
            issues: vec![reason.into()],
            suggestions: Vec::new(),
            tests_passed: 0,
            tests_total: 0,
        }
    }
}

/// Score for a verdict: full marks when correct, the passing share of
/// `max_score` when incorrect with test counts, zero otherwise.
#[must_use]
pub fn score_for(verdict: Verdict, passed: Option<u32>, total: Option<u32>, max_score: u32) -> u32 {
    match (verdict, passed, total) {
        (Verdict::Correct, _, _) => max_score,
        (Verdict::Incorrect, Some(passed), Some(total)) if total > 0 => {
            let share = f64::from(passed.min(total)) / f64::from(total);
            (f64::from(max_score) * share).round() as u32
        }
        _ => 0,
    }
}

/// Decode a verdict document and derive its score.
pub fn parse_outcome(raw: &str, max_score: u32) -> Result<ValidationOutcome, ValidationError> {
    let document = decode_payload(raw)?;
    let label = document
        .get("verdict")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedResponse("response has no `verdict`".into()))?;
    let verdict = Verdict::parse(label).ok_or_else(|| {
        ValidationError::MalformedResponse(format!("unknown verdict `{label}`"))
    })?;

    let passed = count_field(&document, "tests_passed");
    let total = count_field(&document, "tests_total");
    Ok(ValidationOutcome {
        verdict,
        score: score_for(verdict, passed, total, max_score),
        feedback: document
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        issues: string_list(&document, "issues"),
        suggestions: string_list(&document, "suggestions"),
        tests_passed: passed.unwrap_or(0),
        tests_total: total.unwrap_or(0),
    })
}

fn count_field(document: &Value, field: &str) -> Option<u32> {
    document
        .get(field)
        .and_then(Value::as_u64)
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
}

fn string_list(document: &Value, field: &str) -> Vec<String> {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(text) => Some(text.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}
