//! Read-only projection of the processed-history lists.
//!
//! This is the surface dashboards render from. Pure reads, no mutation.

use crate::envelope::JobEnvelope;
use crate::error::Result;
use crate::store::{ListStore, keys};
use std::sync::Arc;

/// Decodes ranges of the success/failure history lists.
pub struct HistoryReader {
    store: Arc<dyn ListStore>,
}

impl HistoryReader {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self { store }
    }

    /// Successfully processed jobs, most recent first.
    /// `start`/`stop` are inclusive indices; negative counts from the tail,
    /// so `(0, -1)` reads the whole list.
    pub async fn successes(&self, start: i64, stop: i64) -> Result<Vec<JobEnvelope>> {
        self.read(keys::SUCCESS, start, stop).await
    }

    /// Failed jobs, most recent first.
    pub async fn failures(&self, start: i64, stop: i64) -> Result<Vec<JobEnvelope>> {
        self.read(keys::FAILED, start, stop).await
    }

    async fn read(&self, list: &str, start: i64, stop: i64) -> Result<Vec<JobEnvelope>> {
        self.store
            .range(list, start, stop)
            .await?
            .iter()
            .map(|raw| JobEnvelope::decode(raw))
            .collect()
    }
}
