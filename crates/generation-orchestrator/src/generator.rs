//! Contract for the external generative-inference service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Sampling options forwarded with every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Free-form label identifying the workflow, for the generator's own logs.
    pub tag: Option<String>,
}

impl GenerationOptions {
    #[must_use]
    pub fn question_batch() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 5_000,
            tag: Some("question_batch".into()),
        }
    }

    #[must_use]
    pub fn submission_review() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1_500,
            tag: Some("submission_review".into()),
        }
    }

    #[must_use]
    pub fn chat() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 800,
            tag: Some("chat_assistant".into()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
}

/// The expensive external call. May be slow; may fail.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GeneratorError>;
}

/// Shared pointer helper for the orchestrator.
pub type SharedGenerator = Arc<dyn Generator>;

/// Recorded invocation captured by [`RecordingGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorCall {
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Simple in-memory generator for integration testing.
#[derive(Debug, Default)]
pub struct RecordingGenerator {
    calls: Mutex<Vec<GeneratorCall>>,
    scripted_responses: Mutex<Vec<Result<String, GeneratorError>>>,
}

impl RecordingGenerator {
    /// Queue the response returned by the next `generate` call.
    pub async fn script_response(&self, response: Result<String, GeneratorError>) {
        self.scripted_responses.lock().await.push(response);
    }

    /// Retrieve the calls recorded so far.
    pub async fn calls(&self) -> Vec<GeneratorCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GeneratorError> {
        self.calls.lock().await.push(GeneratorCall {
            prompt: prompt.to_string(),
            options: options.clone(),
        });

        let mut scripted = self.scripted_responses.lock().await;
        if scripted.is_empty() {
            return Err(GeneratorError::Unavailable("no scripted response".into()));
        }
        scripted.remove(0)
    }
}
