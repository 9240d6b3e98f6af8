//! Integration tests for the worker loop state machine.

use async_trait::async_trait;
use relayq::envelope::{HandlerError, JobEnvelope};
use relayq::producer::Producer;
use relayq::registry::{CompletionHandler, HandlerRegistry, WorkHandler};
use relayq::store::memory::MemoryStore;
use relayq::store::{ListStore, keys};
use relayq::worker::{Worker, WorkerConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        history_limit: Some(100),
        throttle: Duration::from_millis(2),
        pop_timeout: None,
    }
}

/// Spawn a worker for `queue` and return a handle for shutdown.
fn spawn_worker(store: &Arc<MemoryStore>, registry: HandlerRegistry, queue: &str) -> Worker {
    spawn_worker_with(store, registry, queue, fast_config())
}

fn spawn_worker_with(
    store: &Arc<MemoryStore>,
    registry: HandlerRegistry,
    queue: &str,
    config: WorkerConfig,
) -> Worker {
    let worker = Worker::new(store.clone(), registry, queue, config);
    let runner = worker.clone();
    tokio::spawn(async move { runner.run().await });
    worker
}

async fn list_len(store: &MemoryStore, list: &str) -> usize {
    store.range(list, 0, -1).await.unwrap().len()
}

async fn history(store: &MemoryStore, list: &str) -> Vec<JobEnvelope> {
    store
        .range(list, 0, -1)
        .await
        .unwrap()
        .iter()
        .map(|raw| JobEnvelope::decode(raw).unwrap())
        .collect()
}

/// Poll until `queue:<queue>`, the in-flight list, and both histories agree
/// that `n` jobs reached a terminal list and nothing is left in transit.
async fn wait_drained(store: &MemoryStore, queue: &str, terminal: usize) {
    let deadline = async {
        loop {
            let queued = list_len(store, &keys::queue(queue)).await;
            let in_flight = list_len(store, keys::PROCESSING).await;
            let done = list_len(store, keys::SUCCESS).await + list_len(store, keys::FAILED).await;
            if queued == 0 && in_flight == 0 && done >= terminal {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), deadline)
        .await
        .expect("worker did not drain the queue in time");
}

// ---------------------------------------------------------------------------
// Handlers used across tests
// ---------------------------------------------------------------------------

/// Succeeds, echoing the payload back as context.
struct Echo;

#[async_trait]
impl WorkHandler for Echo {
    async fn perform(&self, job: &Value) -> Result<Value, HandlerError> {
        Ok(json!({ "echo": job }))
    }
}

/// Always fails with a typed, coded error.
struct Explode;

#[async_trait]
impl WorkHandler for Explode {
    async fn perform(&self, _job: &Value) -> Result<Value, HandlerError> {
        Err(HandlerError::new("disk on fire").kind("io").code(7))
    }
}

/// Parks in the middle of dispatch until the test releases it.
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl WorkHandler for Gate {
    async fn perform(&self, _job: &Value) -> Result<Value, HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!({ "done": true }))
    }
}

/// Records every completion notification it sees.
struct RecordCompletion {
    seen: Arc<std::sync::Mutex<Vec<(bool, i64)>>>,
}

#[async_trait]
impl CompletionHandler for RecordCompletion {
    async fn on_complete(&self, success: bool, envelope: &JobEnvelope) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((success, envelope.meta.id));
        Ok(())
    }
}

/// A completion handler that always fails.
struct ExplodingCompletion {
    called: Arc<AtomicBool>,
}

#[async_trait]
impl CompletionHandler for ExplodingCompletion {
    async fn on_complete(&self, _success: bool, _envelope: &JobEnvelope) -> anyhow::Result<()> {
        self.called.store(true, Ordering::SeqCst);
        anyhow::bail!("completion exploded")
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_job_routes_to_success_history() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work("send", Echo);
    let worker = spawn_worker(&store, registry, "emails");

    Producer::new(store.clone())
        .push("emails", "send", json!({ "to": "a@b.com" }))
        .await
        .unwrap();
    wait_drained(&store, "emails", 1).await;

    let success = history(&store, keys::SUCCESS).await;
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].meta.queue, "emails");
    assert_eq!(success[0].meta.job_name, "send");
    assert_eq!(success[0].job, json!({ "to": "a@b.com" }));
    assert_eq!(success[0].context, Some(json!({ "echo": { "to": "a@b.com" } })));

    assert_eq!(list_len(&store, keys::FAILED).await, 0);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 0);

    worker.shutdown();
}

#[tokio::test]
async fn failing_job_routes_to_failure_history_with_error_record() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work("burn", Explode);
    let worker = spawn_worker(&store, registry, "jobs");

    Producer::new(store.clone())
        .push("jobs", "burn", json!({}))
        .await
        .unwrap();
    wait_drained(&store, "jobs", 1).await;

    let failed = history(&store, keys::FAILED).await;
    assert_eq!(failed.len(), 1);

    let context = failed[0].context.as_ref().unwrap();
    assert_eq!(context["type"], "io");
    assert_eq!(context["code"], 7);
    assert_eq!(context["message"], "disk on fire");
    assert!(
        context["location"]
            .as_str()
            .unwrap()
            .contains("worker_test.rs"),
        "location should point at the failing handler, got {context}"
    );

    assert_eq!(list_len(&store, keys::SUCCESS).await, 0);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 0);

    worker.shutdown();
}

#[tokio::test]
async fn reregistering_a_work_handler_overwrites() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work("burn", Explode);
    registry.register_work("burn", Echo);
    let worker = spawn_worker(&store, registry, "jobs");

    Producer::new(store.clone())
        .push("jobs", "burn", json!({ "n": 1 }))
        .await
        .unwrap();
    wait_drained(&store, "jobs", 1).await;

    assert_eq!(list_len(&store, keys::SUCCESS).await, 1);
    assert_eq!(list_len(&store, keys::FAILED).await, 0);

    worker.shutdown();
}

// ---------------------------------------------------------------------------
// Missing handler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_without_handler_is_dropped_without_history() {
    let store = Arc::new(MemoryStore::new());
    let worker = spawn_worker(&store, HandlerRegistry::new(), "emails");

    Producer::new(store.clone())
        .push("emails", "unknown", json!({}))
        .await
        .unwrap();

    // Dropped jobs reach no terminal list; wait for queue + in-flight to clear.
    let deadline = async {
        loop {
            if list_len(&store, &keys::queue("emails")).await == 0
                && list_len(&store, keys::PROCESSING).await == 0
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), deadline)
        .await
        .expect("job was not dropped in time");

    assert_eq!(list_len(&store, keys::SUCCESS).await, 0);
    assert_eq!(list_len(&store, keys::FAILED).await, 0);

    worker.shutdown();
}

// ---------------------------------------------------------------------------
// Atomic hand-off
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_is_observable_in_exactly_one_place() {
    let store = Arc::new(MemoryStore::new());
    let producer = Producer::new(store.clone());

    // Before any worker runs: in the source queue only.
    producer.push("emails", "gated", json!({})).await.unwrap();
    assert_eq!(list_len(&store, &keys::queue("emails")).await, 1);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 0);

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work(
        "gated",
        Gate {
            entered: entered.clone(),
            release: release.clone(),
        },
    );
    let worker = spawn_worker(&store, registry, "emails");

    // Mid-dispatch: in the in-flight list only.
    entered.notified().await;
    assert_eq!(list_len(&store, &keys::queue("emails")).await, 0);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 1);
    assert_eq!(list_len(&store, keys::SUCCESS).await, 0);
    assert_eq!(list_len(&store, keys::FAILED).await, 0);

    // After release: in the success history only.
    release.notify_one();
    wait_drained(&store, "emails", 1).await;
    assert_eq!(list_len(&store, keys::SUCCESS).await, 1);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 0);

    worker.shutdown();
}

// ---------------------------------------------------------------------------
// Trim bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_is_trimmed_to_limit_most_recent_first() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work("count", Echo);
    let worker = spawn_worker_with(
        &store,
        registry,
        "numbers",
        WorkerConfig {
            history_limit: Some(3),
            ..fast_config()
        },
    );

    let producer = Producer::new(store.clone());
    for n in 0..5 {
        producer.push("numbers", "count", json!({ "n": n })).await.unwrap();
    }

    // wait_drained counts terminal entries; with trimming the success list
    // caps at 3, so wait on the drained queue instead.
    let deadline = async {
        loop {
            if list_len(&store, &keys::queue("numbers")).await == 0
                && list_len(&store, keys::PROCESSING).await == 0
                && list_len(&store, keys::SUCCESS).await == 3
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), deadline)
        .await
        .expect("history did not settle at the limit");

    // The single worker processes in push order, so the survivors are the
    // last three pushes, most recent first.
    let success = history(&store, keys::SUCCESS).await;
    let ns: Vec<i64> = success
        .iter()
        .map(|e| e.job["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![4, 3, 2]);

    worker.shutdown();
}

#[tokio::test]
async fn unlimited_history_is_never_trimmed() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register_work("count", Echo);
    let worker = spawn_worker_with(
        &store,
        registry,
        "numbers",
        WorkerConfig {
            history_limit: None,
            ..fast_config()
        },
    );

    let producer = Producer::new(store.clone());
    for n in 0..8 {
        producer.push("numbers", "count", json!({ "n": n })).await.unwrap();
    }
    wait_drained(&store, "numbers", 8).await;

    assert_eq!(list_len(&store, keys::SUCCESS).await, 8);

    worker.shutdown();
}

// ---------------------------------------------------------------------------
// Completion notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_handler_sees_recorded_outcome() {
    let store = Arc::new(MemoryStore::new());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    registry.register_work("ok", Echo);
    registry.register_completion("ok", RecordCompletion { seen: seen.clone() });
    registry.register_work("bad", Explode);
    registry.register_completion("bad", RecordCompletion { seen: seen.clone() });
    let worker = spawn_worker(&store, registry, "jobs");

    let producer = Producer::new(store.clone());
    producer.push("jobs", "ok", json!({})).await.unwrap();
    producer.push("jobs", "bad", json!({})).await.unwrap();
    wait_drained(&store, "jobs", 2).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].0, "first job should complete successfully");
    assert!(!seen[1].0, "second job should complete as a failure");

    worker.shutdown();
}

#[tokio::test]
async fn failing_completion_handler_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let called = Arc::new(AtomicBool::new(false));

    let mut registry = HandlerRegistry::new();
    registry.register_work("send", Echo);
    registry.register_completion("send", ExplodingCompletion { called: called.clone() });
    let worker = spawn_worker(&store, registry, "emails");

    Producer::new(store.clone())
        .push("emails", "send", json!({}))
        .await
        .unwrap();
    wait_drained(&store, "emails", 1).await;

    assert!(called.load(Ordering::SeqCst), "completion handler must run");
    assert_eq!(list_len(&store, keys::SUCCESS).await, 1);
    assert_eq!(list_len(&store, keys::FAILED).await, 0);
    assert_eq!(list_len(&store, keys::PROCESSING).await, 0);

    worker.shutdown();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_stops_a_blocked_worker() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(store.clone(), HandlerRegistry::new(), "idle", fast_config());

    let runner = worker.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    worker.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn closing_the_store_stops_an_indefinitely_blocked_worker() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::new(store.clone(), HandlerRegistry::new(), "idle", fast_config());

    let runner = worker.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.close();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop after store close")
        .unwrap();
    assert!(result.is_ok());
}
