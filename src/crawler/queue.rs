//! URL scheduling queue
//!
//! This module holds the URLs waiting to be fetched, ordered by the earliest
//! time each may be fetched. Entries with equal times come out in the order
//! they were pushed. Workers wait on the queue with a timeout and are woken
//! when work arrives or the queue shuts down.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq)]
pub struct UrlQueueEntry {
    pub url: String,

    /// Times this URL was re-enqueued after throttling
    pub retry_count: u32,

    /// Times this URL was re-enqueued after a transport error or 5xx
    pub transient_retries: u32,

    /// Reserved for callers that re-crawl known URLs
    ///
    /// Always `false` for entries the crawler creates. It is carried through
    /// deferrals and retries unchanged; scheduling does not read it.
    pub is_update: bool,

    /// The entry must not be fetched before this instant
    pub earliest_fetch: Instant,
}

impl UrlQueueEntry {
    /// An entry that may be fetched immediately
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_count: 0,
            transient_retries: 0,
            is_update: false,
            earliest_fetch: Instant::now(),
        }
    }

    /// The same entry, pushed back until `earliest_fetch` without using a retry
    pub fn deferred(&self, earliest_fetch: Instant) -> Self {
        Self {
            earliest_fetch,
            ..self.clone()
        }
    }

    /// The same entry for another attempt after throttling
    pub fn retry(&self, earliest_fetch: Instant) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            earliest_fetch,
            ..self.clone()
        }
    }

    /// The same entry for another attempt after a transient failure
    pub fn retry_transient(&self, earliest_fetch: Instant) -> Self {
        Self {
            transient_retries: self.transient_retries + 1,
            earliest_fetch,
            ..self.clone()
        }
    }
}

/// Heap element: earliest `earliest_fetch` first, then lowest sequence
#[derive(Debug)]
struct Queued {
    entry: UrlQueueEntry,
    seq: u64,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest entry
        other
            .entry
            .earliest_fetch
            .cmp(&self.entry.earliest_fetch)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    shutdown: bool,
}

/// Thread-safe priority queue of URLs to fetch
#[derive(Debug, Default)]
pub struct UrlQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl UrlQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an entry and wakes one waiting worker
    pub fn push(&self, entry: UrlQueueEntry) {
        {
            let mut inner = self.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Queued { entry, seq });
        }
        self.notify.notify_one();
    }

    /// Removes the earliest entry without waiting
    pub fn try_pop(&self) -> Option<UrlQueueEntry> {
        self.lock().heap.pop().map(|queued| queued.entry)
    }

    /// Removes the earliest entry, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout, or as soon as the queue is shut down and empty.
    pub async fn wait_and_pop(&self, timeout: Duration) -> Option<UrlQueueEntry> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(queued) = inner.heap.pop() {
                    return Some(queued.entry);
                }
                if inner.shutdown {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Earliest `earliest_fetch` among queued entries
    pub fn peek_earliest(&self) -> Option<Instant> {
        self.lock()
            .heap
            .peek()
            .map(|queued| queued.entry.earliest_fetch)
    }

    /// Marks the queue as finished and wakes every waiting worker
    ///
    /// Entries still queued can be popped; once empty, pops return immediately.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}
