use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::fence::decode_payload;
use crate::ValidationError;

/// Every generated question must offer exactly this many options.
pub const REQUIRED_OPTIONS: usize = 4;

const COLLECTION_FIELD: &str = "questions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOption {
    pub text: String,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// A multiple-choice question that passed structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub options: Vec<ItemOption>,
    #[serde(default)]
    pub correct_feedback: String,
    #[serde(default)]
    pub incorrect_feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_concept: Option<String>,
}

impl GeneratedItem {
    /// The single option flagged correct.
    #[must_use]
    pub fn correct_option(&self) -> Option<&ItemOption> {
        self.options.iter().find(|option| option.is_correct)
    }

    fn is_well_formed(&self) -> bool {
        !self.text.trim().is_empty()
            && self.options.len() == REQUIRED_OPTIONS
            && self.options.iter().filter(|option| option.is_correct).count() == 1
    }
}

/// Extract the question batch from a generator response.
///
/// Elements that do not decode or that break the option rules are dropped; a
/// response whose elements are all invalid yields an empty batch. A response
/// without the `questions` collection is malformed.
pub fn parse_items(raw: &str) -> Result<Vec<GeneratedItem>, ValidationError> {
    let document = decode_payload(raw)?;
    let elements = document
        .get(COLLECTION_FIELD)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ValidationError::MalformedResponse(format!(
                "response has no `{COLLECTION_FIELD}` collection"
            ))
        })?;

    let total = elements.len();
    let items: Vec<GeneratedItem> = elements
        .iter()
        .filter_map(|element| serde_json::from_value::<GeneratedItem>(element.clone()).ok())
        .filter(GeneratedItem::is_well_formed)
        .collect();
    if items.len() < total {
        debug!(
            total,
            kept = items.len(),
            "discarded structurally invalid questions"
        );
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(text: &str, is_correct: bool) -> Value {
        json!({ "text": text, "is_correct": is_correct })
    }

    #[test]
    fn rejects_items_with_two_correct_options() {
        let raw = json!({
            "questions": [{
                "text": "pick one",
                "options": [option("a", true), option("b", true), option("c", false), option("d", false)]
            }]
        })
        .to_string();
        assert!(parse_items(&raw).expect("decodes").is_empty());
    }

    #[test]
    fn rejects_items_with_blank_text_or_bad_shape() {
        let four = vec![option("a", true), option("b", false), option("c", false), option("d", false)];
        let raw = json!({
            "questions": [
                { "text": "   ", "options": four.clone() },
                { "text": "no options" },
                { "text": "wrong type", "options": "a,b,c,d" },
                { "text": "fine", "options": four }
            ]
        })
        .to_string();
        let items = parse_items(&raw).expect("decodes");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "fine");
        assert_eq!(items[0].correct_option().map(|o| o.text.as_str()), Some("a"));
    }

    #[test]
    fn missing_collection_is_malformed() {
        let err = parse_items(r#"{"items": []}"#).expect_err("collection required");
        assert!(err.to_string().contains("questions"));
    }
}
