//! Streaming result queue
//!
//! Workers push finished [`CrawlResult`]s here; the consumer pulls them as
//! they arrive through a [`CrawlStream`]. The stream ends once input is
//! finished, every worker has exited and nothing is left buffered.

use crate::crawler::CrawlResult;
use crate::state::DomainRegistry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Multi-producer, single-consumer queue of results with completion tracking
#[derive(Debug, Default)]
pub struct ResultQueue {
    results: Mutex<VecDeque<CrawlResult>>,
    notify: Notify,
    finished: AtomicBool,
    active_workers: AtomicUsize,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CrawlResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a result and wakes the consumer
    pub fn push(&self, result: CrawlResult) {
        self.lock().push_back(result);
        self.notify.notify_one();
    }

    /// Takes the oldest result, waiting up to `timeout`
    ///
    /// Returns early with `None` once the queue is complete and empty.
    pub async fn try_pop(&self, timeout: Duration) -> Option<CrawlResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.pop_now() {
                return Some(result);
            }
            if self.is_complete() {
                return None;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Takes the oldest result without waiting
    pub fn pop_now(&self) -> Option<CrawlResult> {
        self.lock().pop_front()
    }

    /// Number of buffered results
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Counts workers before they are started
    pub fn register_workers(&self, count: usize) {
        self.active_workers.fetch_add(count, Ordering::SeqCst);
    }

    /// Called by each worker as it exits
    pub fn worker_finished(&self) {
        let previous = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_else(|n| n);
        if previous <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// Marks that no further input will be submitted
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// True when input is finished and every worker has exited
    pub fn is_complete(&self) -> bool {
        self.finished.load(Ordering::SeqCst) && self.active_workers.load(Ordering::SeqCst) == 0
    }
}

/// Consumer side of a running crawl
///
/// Dropping the stream cancels any work still in progress.
#[derive(Debug)]
pub struct CrawlStream {
    results: Arc<ResultQueue>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    registry: Arc<DomainRegistry>,
    poll_interval: Duration,
}

impl CrawlStream {
    pub(crate) fn new(
        results: Arc<ResultQueue>,
        workers: Vec<JoinHandle<()>>,
        cancel: CancellationToken,
        registry: Arc<DomainRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            results,
            workers,
            cancel,
            registry,
            poll_interval,
        }
    }

    /// Waits for the next result
    ///
    /// Returns `None` once the crawl is complete and every result has been
    /// returned. Worker tasks are joined before that happens.
    pub async fn next(&mut self) -> Option<CrawlResult> {
        loop {
            if let Some(result) = self.results.try_pop(self.poll_interval).await {
                return Some(result);
            }

            if self.results.is_complete() {
                // A worker may have pushed between the pop and the check
                if let Some(result) = self.results.pop_now() {
                    return Some(result);
                }
                self.join_workers().await;
                return None;
            }
        }
    }

    /// Drains the stream into a vector
    pub async fn collect_all(mut self) -> Vec<CrawlResult> {
        let mut collected = Vec::new();
        while let Some(result) = self.next().await {
            collected.push(result);
        }
        collected
    }

    /// Stops the crawl; in-flight requests finish, queued URLs are dropped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this crawl when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Domain state shared with the workers
    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn is_complete(&self) -> bool {
        self.results.is_complete() && self.results.is_empty()
    }

    async fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CrawlStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
