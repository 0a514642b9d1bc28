use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use generation_orchestrator::{
    ChatRequest, GenerationService, ItemRequest, PersistenceOutcome, RecordingGenerator,
    ServiceConfig, SubmissionRequest,
};
use ingestion_validation::{Difficulty, Verdict};
use runtime_clock::ManualClock;
use serde::Deserialize;
use storage_ledger::{LedgerRecord, MemoryStore};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct ResponseFixture {
    responses: Vec<RecordedResponse>,
}

#[derive(Debug, Deserialize)]
struct RecordedResponse {
    name: String,
    expected_kept: usize,
    #[serde(default)]
    raw: Option<String>,
}

fn fixture_path(parts: &[&str]) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fixtures");
    for part in parts {
        path = path.join(part);
    }
    path
}

fn recorded(name: &str) -> RecordedResponse {
    let bytes = fs::read(fixture_path(&["generator", "responses.yaml"]))
        .expect("generator response fixture available");
    let fixture: ResponseFixture =
        serde_yaml::from_slice(&bytes).expect("valid generator response fixture");
    fixture
        .responses
        .into_iter()
        .find(|response| response.name == name)
        .expect("named response present")
}

struct Deployment {
    service: Arc<GenerationService>,
    generator: Arc<RecordingGenerator>,
    ledger: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn deploy() -> Deployment {
    let mut config = ServiceConfig::from_file(fixture_path(&["config", "service.toml"]))
        .expect("service config fixture loads");
    config
        .apply_overrides(Vec::<(String, String)>::new())
        .expect("no overrides");
    let clock = Arc::new(ManualClock::new());
    let generator = Arc::new(RecordingGenerator::default());
    let ledger = Arc::new(MemoryStore::new(128, Duration::from_secs(86_400), clock.clone()));
    let service = GenerationService::builder(config, generator.clone())
        .with_clock(clock.clone())
        .with_store(ledger.clone())
        .start()
        .expect("service starts");
    Deployment {
        service: Arc::new(service),
        generator,
        ledger,
        clock,
    }
}

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn config_fixture_drives_service_limits() {
    let deployment = deploy();
    let config = deployment.service.config();
    assert_eq!(config.rpm_limit, 2);
    assert_eq!(config.model, "tutor-fixture");
    assert_eq!(deployment.service.admission_stats().limit, 2);
}

#[tokio::test]
async fn recorded_batch_is_filtered_persisted_and_cached() {
    let deployment = deploy();
    let response = recorded("bare-document");
    deployment
        .generator
        .script_response(Ok(response.raw.clone().expect("raw response")))
        .await;
    let request = ItemRequest {
        topic_id: 11,
        quantity: 2,
        difficulty: Difficulty::Basic,
        topic: Some("python".into()),
        language: Some("python".into()),
    };

    let batch = deployment
        .service
        .generate_items(request.clone())
        .await
        .expect("batch generated");
    assert_eq!(batch.value.generated_count, response.expected_kept);
    assert_eq!(
        batch.persistence,
        PersistenceOutcome::Saved {
            records: response.expected_kept
        }
    );
    let models: Vec<String> = deployment
        .ledger
        .records()
        .into_iter()
        .filter_map(|record| match record {
            LedgerRecord::Question(question) => Some(question.model),
            LedgerRecord::Feedback(_) => None,
        })
        .collect();
    assert_eq!(models, vec!["tutor-fixture", "tutor-fixture"]);

    let cached = deployment
        .service
        .generate_items(request)
        .await
        .expect("cached batch");
    assert!(cached.from_cache);
    assert_eq!(deployment.generator.calls().await.len(), 1);
}

#[tokio::test]
async fn recorded_invalid_batch_yields_nothing() {
    let deployment = deploy();
    let response = recorded("all-invalid");
    deployment
        .generator
        .script_response(Ok(response.raw.expect("raw response")))
        .await;
    let batch = deployment
        .service
        .generate_items(ItemRequest {
            topic_id: 12,
            quantity: 1,
            difficulty: Difficulty::Advanced,
            topic: None,
            language: None,
        })
        .await
        .expect("batch generated");
    assert_eq!(batch.value.generated_count, 0);
    assert!(deployment.ledger.is_empty());
}

#[tokio::test]
async fn concurrent_callers_share_one_window_in_arrival_order() {
    let deployment = deploy();
    for idx in 0..5 {
        deployment
            .generator
            .script_response(Ok(format!("reply {idx}")))
            .await;
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for idx in 0..5 {
        let service = Arc::clone(&deployment.service);
        let done = done_tx.clone();
        tokio::spawn(async move {
            let reply = service
                .converse(&format!("student-{idx}"), ChatRequest::new(format!("hi {idx}")))
                .await;
            let _ = done.send((idx, reply));
        });
        settle().await;
    }
    drop(done_tx);

    let mut completed = Vec::new();
    while let Ok((idx, reply)) = done_rx.try_recv() {
        reply.expect("admitted in first window");
        completed.push(idx);
    }
    assert_eq!(completed, vec![0, 1]);
    assert_eq!(deployment.service.admission_stats().queue_depth, 3);

    deployment.clock.advance(Duration::from_secs(60));
    settle().await;
    let mut second_window = Vec::new();
    while let Ok((idx, reply)) = done_rx.try_recv() {
        reply.expect("admitted in second window");
        second_window.push(idx);
    }
    // Both grants land in the same reset; completion order between them is
    // up to the scheduler.
    second_window.sort_unstable();
    assert_eq!(second_window, vec![2, 3]);
    completed.extend(second_window);

    deployment.clock.advance(Duration::from_secs(60));
    let (idx, reply) = done_rx.recv().await.expect("last caller completes");
    reply.expect("admitted in third window");
    completed.push(idx);
    assert_eq!(completed, vec![0, 1, 2, 3, 4]);
    assert_eq!(deployment.generator.calls().await.len(), 5);
}

#[tokio::test]
async fn evaluation_and_chat_share_the_rate_window() {
    let deployment = deploy();
    deployment
        .generator
        .script_response(Ok(r#"{"verdict": "correct", "feedback": "Well done."}"#.into()))
        .await;
    deployment
        .generator
        .script_response(Ok("Glad it worked!".into()))
        .await;

    let outcome = deployment
        .service
        .validate_submission(SubmissionRequest {
            user_id: 5,
            exercise_id: 9,
            code: "print(sum(range(4)))".into(),
            language: Some("python".into()),
            statement: None,
            test_cases: Vec::new(),
        })
        .await;
    assert_eq!(outcome.value.verdict, Verdict::Correct);
    assert_eq!(outcome.value.score, 100);

    deployment
        .service
        .converse("student-5", ChatRequest::new("thanks"))
        .await
        .expect("reply");
    let stats = deployment.service.admission_stats();
    assert_eq!(stats.count, 2);
    assert!((stats.utilization_percent - 100.0).abs() < f64::EPSILON);
}
