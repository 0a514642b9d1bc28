use std::sync::{Arc, Mutex, PoisonError};

use ingestion_validation::{
    parse_items, parse_outcome, Difficulty, GeneratedItem, ValidationOutcome,
};
use runtime_admission::{AdmissionController, AdmissionStats};
use runtime_clock::{SharedClock, SystemClock};
use storage_cache::{content_digest, spawn_sweeper, CacheKey, MemoryCache, SharedCache};
use storage_ledger::{
    FeedbackRecord, LedgerRecord, NoopStore, OptionRecord, QuestionRecord, SharedStore,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ServiceConfig};
use crate::error::{OrchestratorError, Stage};
use crate::generator::{GenerationOptions, GeneratorError, SharedGenerator};
use crate::outcome::{Generated, PersistenceOutcome};
use crate::prompt;
use crate::request::{ChatReply, ChatRequest, ItemBatch, ItemRequest, SubmissionRequest};
use crate::transcript::{ChatTurn, TranscriptStore};

/// Builder wiring collaborators into a [`GenerationService`].
pub struct GenerationServiceBuilder {
    config: ServiceConfig,
    generator: SharedGenerator,
    clock: Option<SharedClock>,
    store: Option<SharedStore>,
    item_cache: Option<SharedCache<GeneratedItem>>,
    outcome_cache: Option<SharedCache<ValidationOutcome>>,
}

impl GenerationServiceBuilder {
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_item_cache(mut self, cache: SharedCache<GeneratedItem>) -> Self {
        self.item_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_outcome_cache(mut self, cache: SharedCache<ValidationOutcome>) -> Self {
        self.outcome_cache = Some(cache);
        self
    }

    /// Validate the configuration, build the shared state and start the cache
    /// sweepers. Must be called from within a tokio runtime.
    pub fn start(self) -> Result<GenerationService, ConfigError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let admission = AdmissionController::new(self.config.admission_config(), clock.clone())
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        let item_cache = self
            .item_cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(clock.clone())));
        let outcome_cache = self
            .outcome_cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(clock.clone())));
        let period = self.config.sweep_interval();
        let sweepers = vec![
            spawn_sweeper(Arc::clone(&item_cache), clock.clone(), period, "items"),
            spawn_sweeper(Arc::clone(&outcome_cache), clock.clone(), period, "artifacts"),
        ];
        info!(
            rpm_limit = self.config.rpm_limit,
            window_secs = self.config.window_secs,
            model = %self.config.model,
            "generation service started"
        );
        Ok(GenerationService {
            transcripts: TranscriptStore::new(self.config.transcript_turns),
            admission: Arc::new(admission),
            generator: self.generator,
            store: self.store.unwrap_or_else(|| Arc::new(NoopStore)),
            item_cache,
            outcome_cache,
            sweepers: Mutex::new(sweepers),
            config: self.config,
        })
    }
}

/// Cache-first front to the generator. The only component that calls it, and
/// always through the shared admission controller.
pub struct GenerationService {
    config: ServiceConfig,
    admission: Arc<AdmissionController>,
    generator: SharedGenerator,
    store: SharedStore,
    item_cache: SharedCache<GeneratedItem>,
    outcome_cache: SharedCache<ValidationOutcome>,
    transcripts: TranscriptStore,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl GenerationService {
    pub fn builder(config: ServiceConfig, generator: SharedGenerator) -> GenerationServiceBuilder {
        GenerationServiceBuilder {
            config,
            generator,
            clock: None,
            store: None,
            item_cache: None,
            outcome_cache: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn admission(&self) -> Arc<AdmissionController> {
        Arc::clone(&self.admission)
    }

    #[must_use]
    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// Generate a question batch, serving it from cache when enough questions
    /// are already stored for the topic and difficulty.
    pub async fn generate_items(
        &self,
        request: ItemRequest,
    ) -> Result<Generated<ItemBatch>, OrchestratorError> {
        if request.quantity == 0 || request.quantity > self.config.max_batch_quantity {
            return Err(OrchestratorError::InvalidRequest {
                detail: format!(
                    "quantity must be between 1 and {}, got {}",
                    self.config.max_batch_quantity, request.quantity
                ),
            });
        }

        let key = CacheKey::batch(request.topic_id, request.difficulty.as_str());
        match self.item_cache.lookup_at_least(&key, request.quantity) {
            Ok(lookup) if lookup.found => {
                info!(key = %key, cached = lookup.payload.len(), "question batch served from cache");
                return Ok(Generated::cached(ItemBatch::new(request.topic_id, lookup.payload)));
            }
            Ok(_) => debug!(key = %key, "question batch cache miss"),
            Err(err) => warn!(key = %key, error = %err, "question cache lookup failed, treating as miss"),
        }

        let prompt = prompt::question_batch(&request);
        let raw = self
            .call_generator(&prompt, GenerationOptions::question_batch())
            .await?;
        let items = parse_items(&raw).map_err(|err| {
            warn!(key = %key, error = %err, preview = %preview(&raw), "question batch unparseable");
            OrchestratorError::from(err)
        })?;
        info!(
            key = %key,
            requested = request.quantity,
            valid = items.len(),
            "question batch generated"
        );
        if items.is_empty() {
            return Ok(Generated::fresh(
                ItemBatch::new(request.topic_id, items),
                PersistenceOutcome::Skipped,
            ));
        }

        if let Err(err) = self
            .item_cache
            .store(key.clone(), items.clone(), self.config.item_ttl())
        {
            warn!(key = %key, error = %err, "question cache store failed");
        }
        let records = items
            .iter()
            .map(|item| self.question_record(&request, item))
            .collect();
        let persistence = self.persist(records).await;
        Ok(Generated::fresh(
            ItemBatch::new(request.topic_id, items),
            persistence,
        ))
    }

    /// Evaluate a submission. Never fails: any failure becomes an outcome with
    /// verdict `error`.
    pub async fn validate_submission(
        &self,
        request: SubmissionRequest,
    ) -> Generated<ValidationOutcome> {
        let key = CacheKey::artifact(&request.code, request.exercise_id);
        match self.outcome_cache.lookup(&key) {
            Ok(lookup) if lookup.found => {
                if let Some(outcome) = lookup.payload.into_iter().next() {
                    info!(key = %key, verdict = %outcome.verdict, "submission served from cache");
                    return Generated::cached(outcome);
                }
            }
            Ok(_) => debug!(key = %key, "submission cache miss"),
            Err(err) => warn!(key = %key, error = %err, "submission cache lookup failed, treating as miss"),
        }

        match self.evaluate(&request, key).await {
            Ok(generated) => generated,
            Err(err) => {
                warn!(
                    exercise_id = request.exercise_id,
                    stage = %err.stage(),
                    error = %err,
                    "submission evaluation failed"
                );
                Generated::fresh(
                    ValidationOutcome::degraded(err.to_string()),
                    PersistenceOutcome::Skipped,
                )
            }
        }
    }

    /// One conversational turn for `session`. Replies are never cached.
    pub async fn converse(
        &self,
        session: &str,
        request: ChatRequest,
    ) -> Result<ChatReply, OrchestratorError> {
        if request.message.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest {
                detail: "message must not be empty".into(),
            });
        }
        let mut history = request
            .history
            .clone()
            .unwrap_or_else(|| self.transcripts.history(session));
        history.push(ChatTurn::user(request.message.clone()));

        let prompt = prompt::chat(&request.message, &history, request.context.as_ref());
        let reply = self
            .call_generator(&prompt, GenerationOptions::chat())
            .await?;
        let exchange = [
            ChatTurn::user(request.message.clone()),
            ChatTurn::assistant(reply.clone()),
        ];
        match &request.history {
            // Caller-supplied history becomes the session transcript.
            Some(supplied) => self
                .transcripts
                .replace(session, supplied.iter().cloned().chain(exchange).collect()),
            // Appended under the lock so concurrent turns on one session all land.
            None => self.transcripts.append(session, exchange),
        }
        debug!(session, "chat turn recorded");

        Ok(ChatReply {
            reply,
            used_context: request.context.is_some(),
            suggestions: prompt::suggestions(request.context.as_ref()),
        })
    }

    /// Current transcript for `session`.
    pub fn transcript(&self, session: &str) -> Vec<ChatTurn> {
        self.transcripts.history(session)
    }

    pub fn clear_transcript(&self, session: &str) -> bool {
        self.transcripts.clear(session)
    }

    /// Stop the sweepers and close admission; queued callers fail with
    /// `Closed`.
    pub fn shutdown(&self) {
        self.admission.shutdown();
        let mut sweepers = self.sweepers.lock().unwrap_or_else(PoisonError::into_inner);
        for sweeper in sweepers.drain(..) {
            sweeper.abort();
        }
        info!("generation service stopped");
    }

    async fn evaluate(
        &self,
        request: &SubmissionRequest,
        key: CacheKey,
    ) -> Result<Generated<ValidationOutcome>, OrchestratorError> {
        if request.code.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest {
                detail: "submission is empty".into(),
            });
        }
        let prompt = prompt::submission_review(request);
        let raw = self
            .call_generator(&prompt, GenerationOptions::submission_review())
            .await?;
        let outcome = parse_outcome(&raw, self.config.max_score).map_err(|err| {
            warn!(key = %key, error = %err, preview = %preview(&raw), "submission review unparseable");
            OrchestratorError::from(err)
        })?;
        info!(
            key = %key,
            verdict = %outcome.verdict,
            score = outcome.score,
            "submission evaluated"
        );

        if let Err(err) = self
            .outcome_cache
            .store(key.clone(), vec![outcome.clone()], self.config.artifact_ttl())
        {
            warn!(key = %key, error = %err, "submission cache store failed");
        }
        let record = LedgerRecord::Feedback(FeedbackRecord {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            exercise_id: request.exercise_id,
            content_digest: content_digest(&request.code),
            language: request.language.clone(),
            verdict: outcome.verdict.to_string(),
            score: outcome.score,
            feedback: outcome.feedback.clone(),
            model: self.config.model.clone(),
        });
        let persistence = self.persist(vec![record]).await;
        Ok(Generated::fresh(outcome, persistence))
    }

    async fn call_generator(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, OrchestratorError> {
        let grant = match self.config.admission_wait() {
            Some(wait) => self.admission.acquire_within(wait).await,
            None => self.admission.acquire().await,
        }?;
        debug!(
            slot = grant.slot,
            waited_ms = grant.waited.as_millis() as u64,
            tag = options.tag.as_deref().unwrap_or(""),
            "calling generator"
        );

        let timeout = self.config.generator_timeout();
        let result = tokio::time::timeout(timeout, self.generator.generate(prompt, &options))
            .await
            .unwrap_or(Err(GeneratorError::Timeout(timeout)));
        result.map_err(|err| {
            warn!(error = %err, "generator call failed");
            OrchestratorError::ExternalServiceFailure {
                stage: Stage::Generation,
                detail: err.to_string(),
            }
        })
    }

    async fn persist(&self, records: Vec<LedgerRecord>) -> PersistenceOutcome {
        let mut saved = 0usize;
        for record in records {
            match self.store.save(record).await {
                Ok(Some(_)) => saved += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(saved, error = %err, "persistence failed, result kept in cache only");
                    return PersistenceOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }
        }
        if saved > 0 {
            info!(saved, "records persisted");
            PersistenceOutcome::Saved { records: saved }
        } else {
            info!("persistent store unavailable, result kept in cache only");
            PersistenceOutcome::Unavailable
        }
    }

    fn question_record(&self, request: &ItemRequest, item: &GeneratedItem) -> LedgerRecord {
        let difficulty = item
            .difficulty
            .as_deref()
            .map_or(request.difficulty, Difficulty::from_label);
        LedgerRecord::Question(QuestionRecord {
            id: Uuid::new_v4(),
            topic_id: request.topic_id,
            text: item.text.clone(),
            difficulty: difficulty.as_str().to_string(),
            options: item
                .options
                .iter()
                .zip(1u32..)
                .map(|(option, position)| OptionRecord {
                    text: option.text.clone(),
                    is_correct: option.is_correct,
                    explanation: option.explanation.clone(),
                    position,
                })
                .collect(),
            correct_feedback: item.correct_feedback.clone(),
            incorrect_feedback: item.incorrect_feedback.clone(),
            key_concept: item.key_concept.clone(),
            model: self.config.model.clone(),
        })
    }
}

impl Drop for GenerationService {
    fn drop(&mut self) {
        let sweepers = self
            .sweepers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for sweeper in sweepers.drain(..) {
            sweeper.abort();
        }
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}
