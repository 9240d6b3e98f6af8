//! Worker loop: atomically claim queued jobs, dispatch them, route outcomes.
//!
//! One worker processes jobs fully sequentially. Throughput scales by running
//! more worker processes against the same queue name; the store's atomic move
//! partitions jobs across them with no double-processing.

use crate::envelope::{ErrorRecord, JobEnvelope};
use crate::error::Result;
use crate::registry::{HandlerRegistry, WorkHandler};
use crate::store::{ListStore, keys};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_transition, start_job_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum length of each history list after routing. `None` = unbounded.
    pub history_limit: Option<u64>,
    /// Pause after each processed job, so a rapidly drained-and-refilled
    /// queue doesn't turn the loop into a tight spin. Pacing, not correctness.
    pub throttle: Duration,
    /// Timeout for the blocking pop. `None` blocks indefinitely; with a
    /// timeout, an empty result simply re-blocks.
    pub pop_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            history_limit: Some(crate::config::DEFAULT_HISTORY_LIMIT),
            throttle: Duration::from_secs(1),
            pop_timeout: None,
        }
    }
}

/// Outcome of one dispatch, decided at the handler invocation boundary.
enum Outcome {
    Success(serde_json::Value),
    Failure(ErrorRecord),
}

/// The worker loop: claim, dispatch, route, clean up, notify.
pub struct Worker {
    store: Arc<dyn ListStore>,
    registry: Arc<HandlerRegistry>,
    queue: String,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            queue: self.queue.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Worker {
    /// Create a worker consuming the named queue (unprefixed, e.g. `emails`).
    pub fn new(
        store: Arc<dyn ListStore>,
        registry: HandlerRegistry,
        queue_name: &str,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            queue: keys::queue(queue_name),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker to stop. Takes effect at the next loop iteration;
    /// a job already dispatched finishes first.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown.
    ///
    /// Exits cleanly on [`shutdown`](Self::shutdown), or when an
    /// indefinitely-blocking pop returns empty (the store's "no more data"
    /// signal). Store faults during routing or cleanup propagate out and
    /// terminate the loop — restart the process to resume. A job that was
    /// mid-dispatch when the process died stays in `queue:processing`; there
    /// is no automatic reconciliation sweep.
    pub async fn run(&self) -> Result<()> {
        info!(queue = %self.queue, "worker started");

        loop {
            let popped = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = %self.queue, "worker shutting down");
                    return Ok(());
                }
                popped = self.store.move_blocking(
                    &self.queue,
                    keys::PROCESSING,
                    self.config.pop_timeout,
                ) => popped?,
            };

            match popped {
                Some(raw) => {
                    self.process(&raw).await?;
                    tokio::time::sleep(self.config.throttle).await;
                }
                // Pop timed out: go around and block again.
                None if self.config.pop_timeout.is_some() => continue,
                // Indefinite pop came back empty: the store is closed.
                None => {
                    info!(queue = %self.queue, "store closed, worker stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Take one in-flight job through dispatch, routing, cleanup and notify.
    ///
    /// `raw` is the exact string popped from the queue; in-flight removal
    /// matches on it by value, so it must not be re-serialized.
    async fn process(&self, raw: &str) -> Result<()> {
        let mut envelope = match JobEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(payload = raw, error = %e, "dropping undecodable job payload");
                self.store.remove_value(keys::PROCESSING, raw, 1).await?;
                return Ok(());
            }
        };

        let span = start_job_span(&envelope.meta.job_name, envelope.meta.id);

        async {
            let Some(handler) = self.registry.work(&envelope.meta.job_name) else {
                warn!(
                    job = %envelope.meta.job_name,
                    id = envelope.meta.id,
                    payload = raw,
                    "no work handler registered, dropping job"
                );
                metrics::jobs_unroutable().add(
                    1,
                    &[KeyValue::new("job", envelope.meta.job_name.clone())],
                );
                self.store.remove_value(keys::PROCESSING, raw, 1).await?;
                return Ok(());
            };

            record_transition(&span, "in-flight", "dispatched");
            let started = Instant::now();
            let outcome = dispatch(handler.as_ref(), &envelope.job).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let success = matches!(outcome, Outcome::Success(_));
            envelope.context = Some(match outcome {
                Outcome::Success(context) => context,
                Outcome::Failure(record) => serde_json::to_value(&record)?,
            });

            let history = if success { keys::SUCCESS } else { keys::FAILED };
            self.store.prepend(history, &envelope.encode()?).await?;
            if let Some(limit) = self.config.history_limit {
                self.store.trim_front(history, limit).await?;
            }
            record_transition(&span, "dispatched", "routed");

            if !success {
                warn!(
                    id = envelope.meta.id,
                    job = %envelope.meta.job_name,
                    "queue job failed"
                );
            }

            self.store.remove_value(keys::PROCESSING, raw, 1).await?;
            record_transition(&span, "routed", "completed");

            if let Some(completion) = self.registry.completion(&envelope.meta.job_name) {
                // The outcome is already persisted; a completion fault is
                // logged and changes nothing.
                if let Err(e) = completion.on_complete(success, &envelope).await {
                    error!(
                        id = envelope.meta.id,
                        job = %envelope.meta.job_name,
                        success,
                        error = %e,
                        "completion handler failed"
                    );
                }
                record_transition(&span, "completed", "notified");
            }

            metrics::jobs_processed().add(
                1,
                &[
                    KeyValue::new("job", envelope.meta.job_name.clone()),
                    KeyValue::new("outcome", if success { "success" } else { "failure" }),
                ],
            );
            metrics::job_duration_ms().record(
                duration_ms as f64,
                &[KeyValue::new("job", envelope.meta.job_name.clone())],
            );

            Ok(())
        }
        .instrument(span.clone())
        .await
    }
}

/// Invoke the work handler and fold its result into an explicit [`Outcome`].
/// This is the only place a handler failure is turned into an error record.
async fn dispatch(handler: &dyn WorkHandler, job: &serde_json::Value) -> Outcome {
    match handler.perform(job).await {
        Ok(context) => Outcome::Success(context),
        Err(fault) => Outcome::Failure(ErrorRecord::from(fault)),
    }
}
