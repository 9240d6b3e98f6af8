//! In-process list store.
//!
//! Backs the test suite and embedded single-process use. All lists live under
//! one mutex, so the pop-and-push of [`move_blocking`] is a single critical
//! section — exactly the atomicity the contract demands.
//!
//! [`move_blocking`]: super::ListStore::move_blocking

use super::{ListStore, resolve_range};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, i64>,
}

/// A [`ListStore`] held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the store: blocked [`ListStore::move_blocking`] calls wake up and
    /// return `Ok(None)`, the store's "no more data" signal.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pushed.notify_waiters();
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn append(&self, list: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let entries = inner.lists.entry(list.to_string()).or_default();
        entries.push_back(value.to_string());
        let len = entries.len() as u64;
        drop(inner);
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn prepend(&self, list: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let entries = inner.lists.entry(list.to_string()).or_default();
        entries.push_front(value.to_string());
        let len = entries.len() as u64;
        drop(inner);
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Arm the notification before checking, so a push that lands
            // between the check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                let popped = inner.lists.get_mut(src).and_then(VecDeque::pop_front);
                if let Some(value) = popped {
                    inner
                        .lists
                        .entry(dst.to_string())
                        .or_default()
                        .push_front(value.clone());
                    return Ok(Some(value));
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline
                        || tokio::time::timeout(deadline - now, notified).await.is_err()
                    {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn remove_value(&self, list: &str, value: &str, count: u64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let Some(entries) = inner.lists.get_mut(list) else {
            return Ok(0);
        };
        let mut removed = 0;
        while removed < count {
            match entries.iter().position(|v| v == value) {
                Some(idx) => {
                    entries.remove(idx);
                    removed += 1;
                }
                None => break,
            }
        }
        Ok(removed)
    }

    async fn trim_front(&self, list: &str, keep: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entries) = inner.lists.get_mut(list) {
            entries.truncate(keep as usize);
        }
        Ok(())
    }

    async fn increment(&self, counter: &str) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let value = inner.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let Some(entries) = inner.lists.get(list) else {
            return Ok(Vec::new());
        };
        let Some((start, stop)) = resolve_range(entries.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(entries.iter().skip(start).take(stop - start + 1).cloned().collect())
    }
}
