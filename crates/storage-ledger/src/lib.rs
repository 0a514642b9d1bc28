//! Ledger persistence contracts for generated questions and feedback.
//!
//! Persistence is a best-effort side effect: a store may be missing entirely
//! ([`NoopStore`]) or report itself unavailable by returning `Ok(None)`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use runtime_clock::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionRecord {
    pub text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
    /// One-based display position.
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: Uuid,
    pub topic_id: u64,
    pub text: String,
    pub difficulty: String,
    pub options: Vec<OptionRecord>,
    pub correct_feedback: String,
    pub incorrect_feedback: String,
    pub key_concept: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub user_id: u64,
    pub exercise_id: u64,
    pub content_digest: String,
    pub language: Option<String>,
    pub verdict: String,
    pub score: u32,
    pub feedback: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Question(QuestionRecord),
    Feedback(FeedbackRecord),
}

impl LedgerRecord {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Question(record) => record.id,
            Self::Feedback(record) => record.id,
        }
    }
}

/// Durable home for generated records.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Persist `record`. `Ok(None)` means the backing store is unavailable.
    async fn save(&self, record: LedgerRecord) -> anyhow::Result<Option<LedgerRecord>>;
}

/// Shared pointer helper for orchestrators.
pub type SharedStore = Arc<dyn PersistentStore>;

/// Store used when no persistence is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

#[async_trait]
impl PersistentStore for NoopStore {
    async fn save(&self, _record: LedgerRecord) -> anyhow::Result<Option<LedgerRecord>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct LedgerEnvelope {
    record: LedgerRecord,
    inserted_at: Instant,
}

/// Bounded in-memory ledger with count and age retention.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    max_entries: usize,
    max_age: Duration,
    clock: SharedClock,
    inner: Arc<Mutex<VecDeque<LedgerEnvelope>>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize, max_age: Duration, clock: SharedClock) -> Self {
        Self {
            max_entries,
            max_age,
            clock,
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Records still within retention, oldest first.
    pub fn records(&self) -> Vec<LedgerRecord> {
        let now = self.clock.now();
        match self.inner.lock() {
            Ok(mut guard) => {
                self.purge_locked(&mut guard, now);
                guard.iter().map(|env| env.record.clone()).collect()
            }
            Err(err) => {
                warn!(error = %err, "ledger state poisoned, reporting no records");
                Vec::new()
            }
        }
    }

    /// Number of records still within retention.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        match self.inner.lock() {
            Ok(mut guard) => {
                self.purge_locked(&mut guard, now);
                guard.len()
            }
            Err(err) => {
                warn!(error = %err, "ledger state poisoned, reporting no records");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_locked(&self, guard: &mut VecDeque<LedgerEnvelope>, now: Instant) {
        guard.retain(|envelope| now.saturating_duration_since(envelope.inserted_at) <= self.max_age);
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn save(&self, record: LedgerRecord) -> anyhow::Result<Option<LedgerRecord>> {
        if self.max_entries == 0 {
            return Err(LedgerError::Misconfigured("max_entries cannot be zero".into()).into());
        }
        let now = self.clock.now();
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| LedgerError::Poisoned(e.to_string()))?;
        guard.push_back(LedgerEnvelope {
            record: record.clone(),
            inserted_at: now,
        });
        self.purge_locked(&mut guard, now);
        while guard.len() > self.max_entries {
            guard.pop_front();
        }
        Ok(Some(record))
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger misconfigured: {0}")]
    Misconfigured(String),
    #[error("ledger state poisoned: {0}")]
    Poisoned(String),
}
