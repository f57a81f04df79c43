//! Crawler coordinator - starts a crawl and hands back its result stream
//!
//! A crawl is one pool of workers over one list of URLs. The coordinator:
//! - Seeds the scheduling queue with every URL
//! - Sizes and spawns the worker pool
//! - Wires up cancellation and completion tracking
//! - Returns a [`CrawlStream`] the caller pulls results from

use crate::config::{validate, Config};
use crate::crawler::extract::{Extractor, HtmlExtractor};
use crate::crawler::fetcher::{FetchOptions, Fetcher, HttpFetcher};
use crate::crawler::queue::{UrlQueue, UrlQueueEntry};
use crate::crawler::results::{CrawlStream, ResultQueue};
use crate::crawler::source::UrlSource;
use crate::crawler::worker::{run_worker, CrawlContext, QUEUE_POLL_INTERVAL};
use crate::state::DomainRegistry;
use crate::Result;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point for running crawls
///
/// A `Crawler` is cheap to clone and can start any number of independent
/// crawls; each gets its own queue, workers and (unless one is supplied)
/// domain registry.
#[derive(Clone)]
pub struct Crawler {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
}

impl Crawler {
    /// Creates a crawler with explicit fetch and extraction services
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration, validated here
    /// * `fetcher` - The fetch service
    /// * `extractor` - The HTML extraction service
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to start crawls
    /// * `Err(CrawlError::Config)` - The configuration is invalid
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        validate(&config)?;
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            extractor,
        })
    }

    /// Creates a crawler that fetches over HTTP and extracts with scraper
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to start crawls
    /// * `Err(CrawlError)` - The configuration is invalid or the HTTP client
    ///   could not be built
    pub fn with_http(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new()?;
        Self::new(config, Arc::new(fetcher), Arc::new(HtmlExtractor))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options every request of this crawler uses
    pub fn fetch_options(&self) -> FetchOptions {
        self.config.fetch_options()
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// A fresh, empty domain registry using the configured delay
    pub fn new_registry(&self) -> Arc<DomainRegistry> {
        Arc::new(DomainRegistry::new(self.config.crawler.crawl_delay))
    }

    /// Starts crawling `urls` and returns the result stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, urls: Vec<String>) -> CrawlStream {
        self.start_with_registry(urls, self.new_registry())
    }

    /// Reads URLs from a source and starts crawling them
    ///
    /// A failing source is fatal: the error is returned before any worker starts.
    pub fn start_from_source<S: UrlSource + ?Sized>(&self, source: &mut S) -> Result<CrawlStream> {
        let urls = source.urls()?;
        Ok(self.start(urls))
    }

    /// Starts crawling `urls` against an existing domain registry
    ///
    /// Use this to carry pacing state (for example from sitemap discovery)
    /// into the crawl.
    pub fn start_with_registry(&self, urls: Vec<String>, registry: Arc<DomainRegistry>) -> CrawlStream {
        let queue = UrlQueue::new();
        for url in &urls {
            queue.push(UrlQueueEntry::new(url.clone()));
        }

        let pending = urls.len();
        let worker_count = self.config.crawler.max_workers.min(pending).max(1);
        let results = Arc::new(ResultQueue::new());
        let cancel = CancellationToken::new();

        let ctx = Arc::new(CrawlContext {
            config: Arc::clone(&self.config),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            fetch_options: self.config.fetch_options(),
            page_options: self.config.fetch_options().single_attempt(),
            policy: self.config.pacing_policy(),
            queue,
            results: Arc::clone(&results),
            registry: Arc::clone(&registry),
            cancel: cancel.clone(),
            pending: AtomicUsize::new(pending),
        });

        if pending == 0 {
            ctx.queue.shutdown();
        }

        tracing::info!(
            "Starting crawl of {} URLs with {} workers",
            pending,
            worker_count
        );

        results.register_workers(worker_count);
        let workers = (0..worker_count)
            .map(|worker_id| tokio::spawn(run_worker(Arc::clone(&ctx), worker_id)))
            .collect();
        results.mark_finished();

        CrawlStream::new(results, workers, cancel, registry, QUEUE_POLL_INTERVAL)
    }
}
