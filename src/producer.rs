//! Producer side of the queue: build an envelope, append it to a named queue.

use crate::envelope::{JobEnvelope, Meta, now_stamp};
use crate::error::Result;
use crate::store::{ListStore, keys};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::debug;

/// Pushes jobs onto named queues.
pub struct Producer {
    store: Arc<dyn ListStore>,
}

impl Producer {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self { store }
    }

    /// Push a job to the end of `queue` (unprefixed name, e.g. `emails`).
    ///
    /// Allocates the envelope id from the store's shared counter, so
    /// concurrent producers never collide. Returns the queue's new length.
    pub async fn push(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
    ) -> Result<u64> {
        let envelope = JobEnvelope {
            meta: Meta {
                id: self.store.increment(keys::ID_COUNTER).await?,
                queue: queue.to_string(),
                job_name: job_name.to_string(),
                datetime: now_stamp(),
            },
            job: payload,
            context: None,
        };

        let len = self
            .store
            .append(&keys::queue(queue), &envelope.encode()?)
            .await?;

        debug!(id = envelope.meta.id, queue, job = job_name, "job pushed");
        metrics::jobs_pushed().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("job", job_name.to_string()),
            ],
        );

        Ok(len)
    }
}
