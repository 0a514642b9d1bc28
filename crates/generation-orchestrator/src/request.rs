use ingestion_validation::{Difficulty, GeneratedItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transcript::ChatTurn;

/// Request for a batch of generated questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub topic_id: u64,
    pub quantity: usize,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBatch {
    pub topic_id: u64,
    pub items: Vec<GeneratedItem>,
    pub generated_count: usize,
}

impl ItemBatch {
    #[must_use]
    pub fn new(topic_id: u64, items: Vec<GeneratedItem>) -> Self {
        Self {
            topic_id,
            generated_count: items.len(),
            items,
        }
    }
}

/// A submitted artifact to be evaluated against an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub user_id: u64,
    pub exercise_id: u64,
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub statement: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subtopic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Explicit history; when absent the session transcript is used.
    #[serde(default)]
    pub history: Option<Vec<ChatTurn>>,
    #[serde(default)]
    pub context: Option<ChatContext>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: None,
            context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub used_context: bool,
    pub suggestions: Vec<String>,
}
