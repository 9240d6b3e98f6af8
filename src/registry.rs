//! Handler registry.
//!
//! An explicit registry object passed into the worker's constructor — no
//! shared global handler map. Each job name carries two optional roles: a work
//! handler that performs the job, and a completion handler that observes the
//! outcome after it has been recorded.

use crate::envelope::{HandlerError, JobEnvelope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Performs the actual job logic.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Receives the producer's `job` payload. The returned value becomes the
    /// envelope's `context` on success; an `Err` routes the job to the failure
    /// history with a structured error record.
    async fn perform(&self, job: &serde_json::Value) -> Result<serde_json::Value, HandlerError>;
}

/// Observes a job's outcome after routing. Side effects only — its own
/// failures are logged and cannot change what was recorded.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, success: bool, envelope: &JobEnvelope) -> anyhow::Result<()>;
}

#[derive(Default)]
struct JobHandlers {
    work: Option<Arc<dyn WorkHandler>>,
    completion: Option<Arc<dyn CompletionHandler>>,
}

/// Registry of handlers, indexed by job name.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, JobHandlers>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the work handler for a job name. Re-registration overwrites.
    pub fn register_work(&mut self, job_name: impl Into<String>, handler: impl WorkHandler + 'static) {
        self.entries.entry(job_name.into()).or_default().work = Some(Arc::new(handler));
    }

    /// Register the completion handler for a job name. Re-registration overwrites.
    pub fn register_completion(
        &mut self,
        job_name: impl Into<String>,
        handler: impl CompletionHandler + 'static,
    ) {
        self.entries.entry(job_name.into()).or_default().completion = Some(Arc::new(handler));
    }

    /// Look up the work handler for a job name.
    pub fn work(&self, job_name: &str) -> Option<Arc<dyn WorkHandler>> {
        self.entries.get(job_name)?.work.clone()
    }

    /// Look up the completion handler for a job name.
    pub fn completion(&self, job_name: &str) -> Option<Arc<dyn CompletionHandler>> {
        self.entries.get(job_name)?.completion.clone()
    }
}
