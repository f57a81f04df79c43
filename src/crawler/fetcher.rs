//! HTTP fetcher implementation
//!
//! This module defines the fetch service the crawler talks to and its
//! reqwest-backed implementation, including:
//! - Per-request user agent and timeout
//! - Manual redirect handling with loop detection
//! - Retry of transient failures (transport errors and 5xx), except for
//!   statuses the caller handles as throttling
//! - Capture of `Retry-After` on throttling responses

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Retry budget for transient failures inside a single fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry; doubled on each further retry
    pub base_delay: Duration,
}

impl RetryConfig {
    /// A budget that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Options passed with every fetch
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub max_redirects: u32,

    /// Statuses returned straight away instead of retried
    pub throttle_statuses: Vec<u16>,
}

impl FetchOptions {
    /// The same options with retries spaced at least `min_delay` apart
    pub fn paced(&self, min_delay: Duration) -> Self {
        let mut options = self.clone();
        options.retry.base_delay = options.retry.base_delay.max(min_delay);
        options
    }

    /// The same options without internal retries
    pub fn single_attempt(&self) -> Self {
        Self {
            retry: RetryConfig::none(),
            ..self.clone()
        }
    }
}

/// Outcome of a fetch
///
/// A fetch never returns an error: transport failures are reported with
/// `status_code == 0` and a description in `error`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    /// HTTP status code, 0 when no response was received
    pub status_code: u16,

    /// Content-Type header value
    pub content_type: String,

    /// Response body
    pub body: String,

    /// URL after following redirects
    pub final_url: String,

    /// Number of redirects followed
    pub redirect_count: u32,

    /// Transport error description
    pub error: Option<String>,

    /// True for 2xx responses
    pub success: bool,

    /// Time spent on the final attempt
    pub elapsed_ms: u64,

    /// `Retry-After` header, when given in seconds
    pub retry_after: Option<Duration>,
}

impl FetchResponse {
    /// Builds a response that reached the server
    pub fn ok(final_url: &str, status_code: u16, content_type: &str, body: &str) -> Self {
        Self {
            status_code,
            content_type: content_type.to_string(),
            body: body.to_string(),
            final_url: final_url.to_string(),
            success: (200..300).contains(&status_code),
            ..Default::default()
        }
    }

    /// Builds a transport failure
    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            final_url: url.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether no HTTP response was received at all
    pub fn is_transport_error(&self) -> bool {
        self.status_code == 0
    }

    /// Whether the body is HTML or XHTML
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.contains("text/html") || content_type.contains("application/xhtml")
    }

    /// Whether another attempt might succeed: transport errors and 5xx,
    /// minus the statuses the caller backs off on itself
    pub fn is_retryable(&self, throttle_statuses: &[u16]) -> bool {
        if throttle_statuses.contains(&self.status_code) {
            return false;
        }
        self.is_transport_error() || (500..600).contains(&self.status_code)
    }
}

/// The fetch service used by the crawler and robots.txt discovery
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches a URL
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to fetch
    /// * `options` - User agent, timeout, retry and redirect settings
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResponse;
}

/// Builds an HTTP client with proper configuration
///
/// The user agent and timeout are set per request from [`FetchOptions`];
/// redirects are followed manually.
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetch service backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a freshly built client
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client()?))
    }

    /// Creates a fetcher around an existing client
    ///
    /// The client should have automatic redirects disabled.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Performs one attempt, following redirects manually
    async fn fetch_once(&self, url: &str, options: &FetchOptions) -> FetchResponse {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let mut current = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return FetchResponse::failed(url, format!("Invalid URL: {}", e)),
        };
        let mut visited = HashSet::new();
        visited.insert(current.to_string());
        let mut redirect_count = 0u32;

        loop {
            let sent = self
                .client
                .get(current.clone())
                .header(USER_AGENT, options.user_agent.as_str())
                .timeout(options.timeout)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    let mut failed = FetchResponse::failed(current.as_str(), classify_error(&e));
                    failed.redirect_count = redirect_count;
                    failed.elapsed_ms = elapsed(started);
                    return failed;
                }
            };

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                if let Some(location) = location {
                    let next = match current.join(&location) {
                        Ok(next) => next,
                        Err(e) => {
                            return redirect_failure(
                                current.as_str(),
                                status,
                                format!("Invalid redirect location '{}': {}", location, e),
                                redirect_count,
                                elapsed(started),
                            )
                        }
                    };

                    redirect_count += 1;
                    if redirect_count > options.max_redirects {
                        return redirect_failure(
                            next.as_str(),
                            status,
                            format!("Too many redirects (more than {})", options.max_redirects),
                            redirect_count,
                            elapsed(started),
                        );
                    }
                    if !visited.insert(next.to_string()) {
                        return redirect_failure(
                            next.as_str(),
                            status,
                            format!("Redirect loop detected at {}", next),
                            redirect_count,
                            elapsed(started),
                        );
                    }

                    tracing::trace!("Following redirect {} -> {}", current, next);
                    current = next;
                    continue;
                }
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let retry_after = parse_retry_after(status, response.headers().get(RETRY_AFTER));

            let mut fetched = match response.text().await {
                Ok(body) => FetchResponse::ok(current.as_str(), status.as_u16(), &content_type, &body),
                Err(e) => {
                    let mut failed = FetchResponse::failed(
                        current.as_str(),
                        format!("Failed to read body: {}", classify_error(&e)),
                    );
                    failed.status_code = status.as_u16();
                    failed.content_type = content_type;
                    failed
                }
            };
            fetched.redirect_count = redirect_count;
            fetched.retry_after = retry_after;
            fetched.elapsed_ms = elapsed(started);
            return fetched;
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Fetches a URL with retry of transient failures
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Transport error | Retry with exponential delay |
    /// | HTTP 5xx | Retry with exponential delay, at least `Retry-After` |
    /// | Throttle status (`throttle_statuses`) | Returned immediately |
    /// | HTTP 4xx | Returned immediately |
    /// | Redirect loop / too many hops | Returned immediately |
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResponse {
        let mut attempt = 0;
        loop {
            let response = self.fetch_once(url, options).await;

            if response.is_retryable(&options.throttle_statuses)
                && attempt < options.retry.max_retries
            {
                let delay = options
                    .retry
                    .delay_for(attempt)
                    .max(response.retry_after.unwrap_or_default());
                tracing::debug!(
                    "Retrying {} in {:?} (attempt {}, status {}, error {:?})",
                    url,
                    delay,
                    attempt + 1,
                    response.status_code,
                    response.error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return response;
        }
    }
}

/// A redirect that could not be followed keeps the 3xx status it came with
fn redirect_failure(
    url: &str,
    status: StatusCode,
    error: String,
    redirect_count: u32,
    elapsed_ms: u64,
) -> FetchResponse {
    let mut failed = FetchResponse::failed(url, error);
    failed.status_code = status.as_u16();
    failed.redirect_count = redirect_count;
    failed.elapsed_ms = elapsed_ms;
    failed
}

/// Reads `Retry-After` as delta-seconds on throttling responses
fn parse_retry_after(
    status: StatusCode,
    header: Option<&reqwest::header::HeaderValue>,
) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    header
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else {
        error.to_string()
    }
}
