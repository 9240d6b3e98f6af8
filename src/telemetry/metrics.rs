//! Metric instrument factories for relayq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"relayq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for relayq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("relayq")
}

/// Counter: jobs pushed by producers.
/// Labels: `queue`, `job`.
pub fn jobs_pushed() -> Counter<u64> {
    meter()
        .u64_counter("relayq.jobs.pushed")
        .with_description("Number of jobs pushed onto queues")
        .build()
}

/// Counter: jobs fully processed by the worker.
/// Labels: `job`, `outcome` ("success" | "failure").
pub fn jobs_processed() -> Counter<u64> {
    meter()
        .u64_counter("relayq.jobs.processed")
        .with_description("Number of jobs routed to a history list")
        .build()
}

/// Counter: jobs dropped because no work handler matched the job name.
/// Labels: `job`.
pub fn jobs_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("relayq.jobs.unroutable")
        .with_description("Jobs with no registered work handler")
        .build()
}

/// Counter: store-level list operations.
/// Labels: `list`, `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("relayq.store.operations")
        .with_description("Number of list store operations")
        .build()
}

/// Histogram: work handler duration in milliseconds.
/// Labels: `job`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("relayq.job.duration_ms")
        .with_description("Work handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
