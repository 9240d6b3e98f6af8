//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs flowing
//! through the worker loop.

use tracing::Span;

/// Start a span covering one job's dispatch through notification.
///
/// The `job.state` field is declared empty and can be updated via
/// [`record_transition`].
pub fn start_job_span(job_name: &str, id: i64) -> Span {
    tracing::info_span!(
        "job.process",
        "job.name" = job_name,
        "job.id" = id,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
