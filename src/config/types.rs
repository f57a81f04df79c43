use crate::crawler::{FetchOptions, RetryConfig};
use crate::state::PacingPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Ripple-Crawl
///
/// Every section and field is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,

    /// Extraction fields: name -> CSS selector or structured-data path
    pub extract: BTreeMap<String, String>,
}

impl Config {
    /// Options handed to the fetch service for every request
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            user_agent: self.crawler.user_agent.clone(),
            timeout: Duration::from_secs(self.crawler.timeout),
            retry: RetryConfig {
                max_retries: self.fetch.max_retries,
                base_delay: Duration::from_millis(self.fetch.retry_delay_ms),
            },
            max_redirects: self.fetch.max_redirects,
            throttle_statuses: self.crawler.throttle_status_codes.clone(),
        }
    }

    /// Backoff and adaptive delay tuning
    pub fn pacing_policy(&self) -> PacingPolicy {
        PacingPolicy::from_config(&self.crawler)
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// User-Agent header, also used to select robots.txt rules
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Minimum seconds between requests to the same domain
    #[serde(rename = "crawl-delay")]
    pub crawl_delay: f64,

    /// Per-request timeout in seconds
    pub timeout: u64,

    /// Whether to fetch and obey robots.txt
    #[serde(rename = "respect-robots-txt")]
    pub respect_robots_txt: bool,

    /// Size of the worker pool
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Re-enqueues of a throttled URL before giving up on it
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// First throttling backoff in seconds
    #[serde(rename = "backoff-base")]
    pub backoff_base: f64,

    /// Maximum throttling backoff and crawl delay in seconds
    #[serde(rename = "backoff-cap")]
    pub backoff_cap: f64,

    /// Average response time (ms) under which the crawl delay relaxes
    #[serde(rename = "fast-response-ms")]
    pub fast_response_ms: f64,

    /// Statuses treated as "slow down"
    #[serde(rename = "throttle-status-codes")]
    pub throttle_status_codes: Vec<u16>,

    /// Emit a result row for URLs skipped by robots.txt
    #[serde(rename = "report-robots-skipped")]
    pub report_robots_skipped: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: "RippleCrawl/1.0".to_string(),
            crawl_delay: 0.2,
            timeout: 30,
            respect_robots_txt: true,
            max_workers: 4,
            max_retries: 3,
            backoff_base: 1.0,
            backoff_cap: 60.0,
            fast_response_ms: 1000.0,
            throttle_status_codes: vec![429],
            report_robots_skipped: false,
        }
    }
}

/// Fetch service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries of transport errors and 5xx inside one fetch
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay before the first of those retries, in milliseconds
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Redirect hops followed before failing
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
            max_redirects: 10,
        }
    }
}

/// Where results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    /// Rows in a SQLite table
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,

    /// JSON lines file; standard output when unset
    #[serde(rename = "jsonl-path")]
    pub jsonl_path: Option<String>,

    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Rows per SQLite transaction
    #[serde(rename = "batch-size")]
    pub batch_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jsonl,
            jsonl_path: None,
            database_path: "crawl.db".to_string(),
            batch_size: 100,
        }
    }
}
