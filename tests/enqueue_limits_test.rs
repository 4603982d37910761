//! Integration tests for enqueue-time admission.

mod helpers;

use std::sync::Arc;

use serde_json::{Value, json};

use jobgate_concurrency::store::LockScope;
use jobgate_concurrency::{ConcurrencyError, JobRegistry, JobStore, JobType, LimitKind, LimitPolicy};
use jobgate_entity::job::NewJob;

use helpers::TestApp;

fn registry_with(job_type: JobType) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(job_type);
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_total_limit_admits_exactly_n_of_n_plus_one_concurrent() {
    const LIMIT: u32 = 3;
    let app = TestApp::new(
        registry_with(
            JobType::new("Report").with_concurrency(LimitPolicy::new().total_limit(LIMIT)),
        ),
        vec![],
    );

    let mut tasks = Vec::new();
    for _ in 0..=LIMIT {
        let queue = app.queue.clone();
        tasks.push(tokio::spawn(async move {
            queue
                .enqueue(NewJob::new("Report", json!({})))
                .await
                .unwrap()
                .is_admitted()
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, LIMIT);
    assert_eq!(app.count("Report").await, i64::from(LIMIT));
}

#[tokio::test]
async fn test_locking_a_job_frees_an_enqueue_slot() {
    let app = TestApp::new(
        registry_with(
            JobType::new("Greet")
                .with_concurrency(LimitPolicy::new().enqueue_limit(1).key_argument("name")),
        ),
        vec![],
    );

    assert!(app.enqueue("Greet", json!({"name": "Alice"})).await);
    assert!(!app.enqueue("Greet", json!({"name": "Alice"})).await);

    let claim = app
        .queue
        .dequeue(&["default".to_string()])
        .await
        .unwrap()
        .expect("a queued job");

    assert!(app.enqueue("Greet", json!({"name": "Alice"})).await);
    assert_eq!(
        app.store.count_unfinished("Alice", LockScope::Unlocked).await.unwrap(),
        1
    );
    assert_eq!(app.count("Alice").await, 2);

    claim.release().await.unwrap();
}

#[tokio::test]
async fn test_alice_and_bob_scenario() {
    let app = TestApp::new(
        registry_with(
            JobType::new("Greet")
                .with_concurrency(LimitPolicy::new().enqueue_limit(2).key_argument("name")),
        ),
        vec![],
    );

    assert!(app.enqueue("Greet", json!({"name": "Alice"})).await);
    assert!(app.enqueue("Greet", json!({"name": "Alice"})).await);

    let third = app
        .queue
        .enqueue(NewJob::new("Greet", json!({"name": "Alice"})))
        .await
        .unwrap();
    let rejection = third.rejection().expect("third Alice is rejected");
    assert_eq!(rejection.limit, LimitKind::EnqueueLimit);
    assert_eq!(rejection.limit_value, 2);

    assert!(app.enqueue("Greet", json!({"name": "Bob"})).await);

    assert_eq!(app.count("Alice").await, 2);
    assert_eq!(app.count("Bob").await, 1);
}

#[tokio::test]
async fn test_no_policy_means_unlimited() {
    let app = TestApp::new(JobRegistry::new(), vec![]);

    for _ in 0..20 {
        assert!(app.enqueue("Anything", json!({"name": "Alice"})).await);
    }
}

#[tokio::test]
async fn test_nil_key_means_unlimited() {
    let app = TestApp::new(
        registry_with(
            JobType::new("Greet").with_concurrency(
                LimitPolicy::new()
                    .total_limit(1)
                    .enqueue_limit(1)
                    .key_with(|_| Value::Null),
            ),
        ),
        vec![],
    );

    for _ in 0..20 {
        assert!(app.enqueue("Greet", json!({})).await);
    }
}

#[tokio::test]
async fn test_structured_key_raises_key_type_error() {
    let app = TestApp::new(
        registry_with(
            JobType::new("Greet").with_concurrency(
                LimitPolicy::new()
                    .enqueue_limit(1)
                    .key_with(|ctx| ctx.arguments.clone()),
            ),
        ),
        vec![],
    );

    let err = app
        .queue
        .enqueue(NewJob::new("Greet", json!({"name": "Alice"})))
        .await
        .unwrap_err();

    match err {
        ConcurrencyError::KeyType { job_class, type_name } => {
            assert_eq!(job_class, "Greet");
            assert_eq!(type_name, "object");
        }
        other => panic!("expected KeyType, got {other:?}"),
    }
}

#[tokio::test]
async fn test_limits_are_evaluated_per_instance() {
    let app = TestApp::new(
        registry_with(
            JobType::new("Batch").with_concurrency(
                LimitPolicy::new()
                    .key_argument("tenant")
                    .total_limit_with(|ctx| {
                        ctx.argument("slots")
                            .and_then(Value::as_u64)
                            .map_or(1, |slots| slots as u32)
                    }),
            ),
        ),
        vec![],
    );

    assert!(app.enqueue("Batch", json!({"tenant": "acme", "slots": 2})).await);
    assert!(app.enqueue("Batch", json!({"tenant": "acme", "slots": 2})).await);
    assert!(!app.enqueue("Batch", json!({"tenant": "acme", "slots": 2})).await);
    assert!(app.enqueue("Batch", json!({"tenant": "acme", "slots": 5})).await);
}

#[tokio::test]
async fn test_subclass_inherits_parent_limits() {
    let mut registry = JobRegistry::new();
    registry
        .register(
            JobType::new("Sync")
                .with_concurrency(LimitPolicy::new().total_limit(1).key_argument("account")),
        )
        .register(JobType::new("FullSync").extends("Sync"));
    let app = TestApp::new(registry, vec![]);

    assert!(app.enqueue("FullSync", json!({"account": "a1"})).await);
    assert!(!app.enqueue("FullSync", json!({"account": "a1"})).await);
    assert!(app.enqueue("FullSync", json!({"account": "a2"})).await);

    let store: Arc<dyn JobStore> = app.store.clone();
    assert_eq!(store.key_stats("a1").await.unwrap().queued, 1);
}
