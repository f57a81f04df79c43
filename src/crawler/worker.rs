//! Crawl worker loop
//!
//! Each worker repeatedly takes a URL from the scheduling queue and carries
//! it through one attempt:
//! 1. Parse the URL and look up its domain state
//! 2. Consult robots.txt (fetched once per domain, under the domain lock)
//! 3. Wait until the domain may be requested again, or defer the URL so
//!    other work can proceed
//! 4. Fetch, then update pacing from the response
//! 5. Publish a result, or re-enqueue the URL when the server throttled us
//!    or the fetch failed transiently
//!
//! Transient failures (transport errors, 5xx outside the throttle statuses)
//! are retried through the queue rather than inside the fetch, so every
//! attempt waits for the domain's spacing like any other request.
//!
//! A URL is resolved exactly once: when its result is published or it is
//! dropped as disallowed. When the last URL resolves the queue shuts down
//! and every worker exits.

use crate::config::Config;
use crate::crawler::extract::{extract_fields, Extractor};
use crate::crawler::fetcher::{FetchOptions, FetchResponse, Fetcher};
use crate::crawler::queue::{UrlQueue, UrlQueueEntry};
use crate::crawler::record::{CrawlOutcome, CrawlResult};
use crate::crawler::results::ResultQueue;
use crate::robots::fetch_robots;
use crate::state::{DomainRegistry, DomainSlot, PacingPolicy};
use crate::url::{extract_domain, parse_crawl_url, request_path};
use crate::UrlError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How long an idle worker waits on the queue before re-checking for shutdown
pub(crate) const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Waits shorter than this are slept through rather than deferred
const DEFER_THRESHOLD: Duration = Duration::from_millis(50);

/// Everything the workers of one crawl share
pub(crate) struct CrawlContext {
    pub config: Arc<Config>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    /// Options for robots.txt fetches, which retry inside the fetch
    pub fetch_options: FetchOptions,

    /// Options for page fetches: one attempt each
    pub page_options: FetchOptions,
    pub policy: PacingPolicy,
    pub queue: UrlQueue,
    pub results: Arc<ResultQueue>,
    pub registry: Arc<DomainRegistry>,
    pub cancel: CancellationToken,

    /// URLs not yet resolved
    pub pending: AtomicUsize,
}

enum SlotDecision {
    /// The request may start now; the domain's spacing has been claimed
    Claimed,
    /// The entry went back on the queue
    Deferred,
    Cancelled,
}

/// Reports the worker's exit to the result queue however the task ends
struct WorkerGuard {
    worker_id: usize,
    results: Arc<ResultQueue>,
    cancel: CancellationToken,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("Worker {} panicked; cancelling crawl", self.worker_id);
            self.cancel.cancel();
        }
        self.results.worker_finished();
    }
}

/// Runs one worker until the queue is drained or the crawl is cancelled
pub(crate) async fn run_worker(ctx: Arc<CrawlContext>, worker_id: usize) {
    let _guard = WorkerGuard {
        worker_id,
        results: Arc::clone(&ctx.results),
        cancel: ctx.cancel.clone(),
    };
    tracing::debug!("Worker {} started", worker_id);

    loop {
        if ctx.cancel.is_cancelled() {
            tracing::debug!("Worker {} stopping: crawl cancelled", worker_id);
            break;
        }

        match ctx.queue.wait_and_pop(QUEUE_POLL_INTERVAL).await {
            Some(entry) => ctx.process(entry).await,
            None => {
                if ctx.queue.is_shutdown() && ctx.queue.is_empty() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Worker {} exiting", worker_id);
}

impl CrawlContext {
    async fn process(&self, entry: UrlQueueEntry) {
        let url = match parse_crawl_url(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Rejecting {}: {}", entry.url, e);
                self.publish(CrawlResult::failure(
                    &entry.url,
                    CrawlOutcome::InvalidUrl,
                    e.to_string(),
                    entry.retry_count,
                ));
                return;
            }
        };

        let Some(domain) = extract_domain(&url) else {
            self.publish(CrawlResult::failure(
                &entry.url,
                CrawlOutcome::InvalidUrl,
                UrlError::MissingDomain.to_string(),
                entry.retry_count,
            ));
            return;
        };
        let slot = self.registry.get_or_create(&domain);

        if self.config.crawler.respect_robots_txt && !self.check_robots(&slot, &url).await {
            tracing::debug!("Skipping {}: disallowed by robots.txt", entry.url);
            if self.config.crawler.report_robots_skipped {
                self.publish(CrawlResult::failure(
                    &entry.url,
                    CrawlOutcome::RobotsDenied,
                    "Disallowed by robots.txt",
                    entry.retry_count,
                ));
            } else {
                self.resolve();
            }
            return;
        }

        match self.acquire_slot(&slot, &entry).await {
            SlotDecision::Claimed => {}
            SlotDecision::Deferred | SlotDecision::Cancelled => return,
        }

        tracing::debug!("Fetching {} (retry {})", entry.url, entry.retry_count);
        let response = self.fetcher.fetch(url.as_str(), &self.page_options).await;
        let now = Instant::now();

        if self
            .config
            .crawler
            .throttle_status_codes
            .contains(&response.status_code)
        {
            self.handle_throttle(&slot, entry, response, now).await;
            return;
        }

        if response.is_retryable(&self.page_options.throttle_statuses)
            && entry.transient_retries < self.fetch_options.retry.max_retries
            && !self.cancel.is_cancelled()
        {
            self.retry_transient(&slot, entry, response, now).await;
            return;
        }

        {
            let mut state = slot.lock().await;
            state.finish_request(now);
            if !response.is_transport_error() {
                state.record_response(response.elapsed_ms as f64, response.success, &self.policy);
            }
            if response.success {
                state.urls_crawled += 1;
            } else {
                state.urls_failed += 1;
            }
        }

        let mut result = CrawlResult::from_response(&entry.url, response, entry.retry_count);
        if result.outcome.is_success() && result.is_html() && !result.body.is_empty() {
            self.enrich(&mut result);
        }
        self.publish(result);
    }

    /// Fetches robots.txt on first contact with a domain, then checks the path
    ///
    /// The domain lock is held across the robots.txt fetch so it happens once.
    /// The fetch counts as a request to the domain for spacing purposes.
    async fn check_robots(&self, slot: &DomainSlot, url: &Url) -> bool {
        let mut state = slot.lock().await;

        if !state.robots_fetched {
            let started = Instant::now();
            let ready_at = state.ready_at(started);
            if ready_at > started {
                tokio::time::sleep_until(ready_at).await;
            }
            state.claim(Instant::now());
            let options = self.fetch_options.paced(state.crawl_delay());
            let robots = fetch_robots(self.fetcher.as_ref(), url, &options).await;
            state.finish_request(Instant::now());

            let rules = robots.rules_for(&self.config.crawler.user_agent);
            state.apply_robots(rules);
            tracing::info!(
                "robots.txt for {}: {} disallow, {} allow, delay {:.2}s",
                url.host_str().unwrap_or_default(),
                state.rules.disallow.len(),
                state.rules.allow.len(),
                state.crawl_delay_seconds
            );
        }

        let allowed = state.is_allowed(&request_path(url));
        if !allowed {
            state.urls_skipped += 1;
        }
        allowed
    }

    /// Waits until the domain may be requested and claims the request
    ///
    /// When the wait is long and the queue holds work that could run sooner,
    /// the entry is re-queued for when the domain becomes ready instead.
    async fn acquire_slot(&self, slot: &DomainSlot, entry: &UrlQueueEntry) -> SlotDecision {
        loop {
            let now = Instant::now();
            let ready_at = {
                let mut state = slot.lock().await;
                let ready_at = state.ready_at(now).max(entry.earliest_fetch);
                if ready_at <= now {
                    state.claim(now);
                    return SlotDecision::Claimed;
                }
                ready_at
            };

            let wait = ready_at.saturating_duration_since(now);
            let other_work_sooner = self
                .queue
                .peek_earliest()
                .is_some_and(|earliest| earliest < ready_at);
            if wait > DEFER_THRESHOLD && other_work_sooner {
                tracing::trace!("Deferring {} by {:?}", entry.url, wait);
                self.queue.push(entry.deferred(ready_at));
                return SlotDecision::Deferred;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return SlotDecision::Cancelled,
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }
    }

    /// Backs the domain off and re-enqueues the URL, or gives up on it
    async fn handle_throttle(
        &self,
        slot: &DomainSlot,
        entry: UrlQueueEntry,
        response: FetchResponse,
        now: Instant,
    ) {
        let exhausted = entry.retry_count >= self.config.crawler.max_retries;
        let horizon = {
            let mut state = slot.lock().await;
            state.finish_request(now);
            let horizon = state.record_throttle(now, response.retry_after, &self.policy);
            if exhausted {
                state.urls_failed += 1;
            }
            horizon
        };

        if exhausted {
            tracing::warn!(
                "Giving up on {}: still throttled (HTTP {}) after {} retries",
                entry.url,
                response.status_code,
                entry.retry_count
            );
            let status = response.status_code;
            let mut result = CrawlResult::from_response(&entry.url, response, entry.retry_count);
            result.outcome = CrawlOutcome::RateLimited;
            result.error = Some(format!(
                "Throttled with HTTP {} after {} retries",
                status, entry.retry_count
            ));
            self.publish(result);
        } else {
            tracing::warn!(
                "{} throttled with HTTP {}; retrying in {:?}",
                entry.url,
                response.status_code,
                horizon.saturating_duration_since(now)
            );
            self.queue.push(entry.retry(horizon));
        }
    }

    /// Re-enqueues a URL whose fetch failed transiently
    ///
    /// The retry waits at least the fetch retry delay (or `Retry-After`), and
    /// then for the domain's spacing when it is dequeued.
    async fn retry_transient(
        &self,
        slot: &DomainSlot,
        entry: UrlQueueEntry,
        response: FetchResponse,
        now: Instant,
    ) {
        {
            let mut state = slot.lock().await;
            state.finish_request(now);
            if !response.is_transport_error() {
                state.record_response(response.elapsed_ms as f64, false, &self.policy);
            }
        }

        let delay = self
            .fetch_options
            .retry
            .delay_for(entry.transient_retries)
            .max(response.retry_after.unwrap_or_default());
        tracing::debug!(
            "Retrying {} in {:?} (attempt {}, status {}, error {:?})",
            entry.url,
            delay,
            entry.transient_retries + 1,
            response.status_code,
            response.error
        );
        self.queue.push(entry.retry_transient(now + delay));
    }

    fn enrich(&self, result: &mut CrawlResult) {
        let structured = self.extractor.extract_structured(&result.body);
        if !self.config.extract.is_empty() {
            result.fields = extract_fields(self.extractor.as_ref(), &result.body, &self.config.extract);
        }
        result.set_structured(structured);
    }

    fn publish(&self, result: CrawlResult) {
        self.results.push(result);
        self.resolve();
    }

    /// Marks one URL as done; the last one shuts the queue down
    fn resolve(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("All URLs resolved; shutting down queue");
            self.queue.shutdown();
        }
    }
}
