//! Ordered-list store contract and backends.
//!
//! The queue is built entirely on a handful of atomic list operations; this
//! module defines that contract plus the reserved list names. Two backends are
//! provided: [`memory::MemoryStore`] for tests and embedded use, and
//! [`postgres::PgStore`] for deployments.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Reserved list and counter names.
pub mod keys {
    /// Jobs that have been dequeued but not yet fully processed.
    pub const PROCESSING: &str = "queue:processing";

    /// Bounded history of successfully processed jobs, most recent first.
    pub const SUCCESS: &str = "queue:processed:success";

    /// Bounded history of failed jobs, most recent first. Checked by operators
    /// (or a cron job) to rerun work if they choose.
    pub const FAILED: &str = "queue:processed:failed";

    /// Monotonic counter backing envelope ids.
    pub const ID_COUNTER: &str = "queue:meta:id";

    /// Full list name for a source queue.
    pub fn queue(name: &str) -> String {
        format!("queue:{name}")
    }
}

/// Atomic operations over named ordered lists of opaque payloads.
///
/// Every method is a single atomic store operation; the queue protocol needs
/// no client-side locking beyond that.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Push a value onto the tail of a list. Returns the new list length.
    async fn append(&self, list: &str, value: &str) -> Result<u64>;

    /// Push a value onto the head of a list. Returns the new list length.
    async fn prepend(&self, list: &str, value: &str) -> Result<u64>;

    /// Atomically pop the head of `src` and push it onto the head of `dst`.
    ///
    /// Blocks until a value is available. With a timeout, `Ok(None)` means the
    /// timeout expired; with `timeout = None` the call blocks indefinitely and
    /// `Ok(None)` is the store's "closed, no more data" signal.
    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>>;

    /// Remove up to `count` head-most occurrences of `value` from a list.
    /// Returns how many were removed.
    async fn remove_value(&self, list: &str, value: &str, count: u64) -> Result<u64>;

    /// Drop everything past the first `keep` entries of a list.
    async fn trim_front(&self, list: &str, keep: u64) -> Result<()>;

    /// Atomically increment a named counter, returning the new value.
    /// The first increment returns 1.
    async fn increment(&self, counter: &str) -> Result<i64>;

    /// Read the inclusive range `[start, stop]` of a list. Negative indices
    /// count from the tail, `-1` being the last entry.
    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>>;
}

/// Resolve an inclusive, possibly-negative range against a list length.
/// Returns `None` when the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}
