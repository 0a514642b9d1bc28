//! Cache-first orchestration of rate-limited generator calls.
//!
//! [`GenerationService`] consults the result caches, admits generator calls
//! through the shared window, validates what comes back and records it in the
//! persistent ledger on a best-effort basis.

pub mod config;
pub mod error;
pub mod generator;
pub mod outcome;
pub mod prompt;
pub mod request;
pub mod service;
pub mod transcript;

pub use config::{ConfigError, ServiceConfig, MODEL_ENV, RPM_LIMIT_ENV};
pub use error::{OrchestratorError, Stage};
pub use generator::{
    GenerationOptions, Generator, GeneratorCall, GeneratorError, RecordingGenerator,
    SharedGenerator,
};
pub use outcome::{Generated, PersistenceOutcome};
pub use request::{ChatContext, ChatReply, ChatRequest, ItemBatch, ItemRequest, SubmissionRequest};
pub use service::{GenerationService, GenerationServiceBuilder};
pub use transcript::{ChatTurn, Role, TranscriptStore};
