//! Crawler module for concurrent, polite page fetching
//!
//! This module contains the core crawling logic, including:
//! - The fetch and extraction services
//! - Table extraction with column type inference
//! - The time-ordered scheduling queue
//! - The worker pool and per-domain pacing
//! - Streaming of results back to the caller

mod coordinator;
mod extract;
mod fetcher;
mod queue;
mod record;
mod results;
mod source;
mod table;
mod worker;

pub use coordinator::Crawler;
pub use extract::{extract_fields, ElementData, Extractor, FieldExpr, HtmlExtractor, StructuredData};
pub use fetcher::{build_http_client, FetchOptions, FetchResponse, Fetcher, HttpFetcher, RetryConfig};
pub use queue::{UrlQueue, UrlQueueEntry};
pub use record::{CrawlOutcome, CrawlResult};
pub use results::{CrawlStream, ResultQueue};
pub use source::{LineSource, UrlSource};
pub use table::{read_table, ColumnType, HtmlTable, TableError};

use crate::config::Config;
use crate::Result;

/// Crawls a list of URLs over HTTP and collects every result
///
/// This is the simplest entry point: it builds an HTTP crawler, runs it to
/// completion and returns the results in completion order.
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `urls` - The URLs to crawl
///
/// # Returns
///
/// * `Ok(Vec<CrawlResult>)` - One result per URL (minus robots.txt skips)
/// * `Err(CrawlError)` - The HTTP client could not be built
pub async fn crawl(config: Config, urls: Vec<String>) -> Result<Vec<CrawlResult>> {
    let crawler = Crawler::with_http(config)?;
    Ok(crawler.start(urls).collect_all().await)
}
