//! Per-URL crawl result records
//!
//! Every URL handed to the crawler produces exactly one [`CrawlResult`],
//! whether it was fetched, failed, or skipped.

use crate::crawler::extract::StructuredData;
use crate::crawler::fetcher::FetchResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// How a URL's crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlOutcome {
    /// 2xx response
    Success,

    /// Non-2xx response that is not a throttling status
    HttpError,

    /// No response received (timeout, connection failure, redirect error)
    TransportError,

    /// Still throttled after the retry budget was spent
    RateLimited,

    /// Disallowed by robots.txt
    RobotsDenied,

    /// The URL could not be parsed or has an unsupported scheme
    InvalidUrl,
}

impl CrawlOutcome {
    /// Returns true if this represents a successful fetch
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the URL was never requested
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::RobotsDenied | Self::InvalidUrl)
    }

    /// Returns true if this represents an error
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::HttpError | Self::TransportError | Self::RateLimited | Self::InvalidUrl
        )
    }

    /// Converts the outcome to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::HttpError => "http_error",
            Self::TransportError => "transport_error",
            Self::RateLimited => "rate_limited",
            Self::RobotsDenied => "robots_denied",
            Self::InvalidUrl => "invalid_url",
        }
    }

    /// Parses an outcome from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "http_error" => Some(Self::HttpError),
            "transport_error" => Some(Self::TransportError),
            "rate_limited" => Some(Self::RateLimited),
            "robots_denied" => Some(Self::RobotsDenied),
            "invalid_url" => Some(Self::InvalidUrl),
            _ => None,
        }
    }

    /// Returns all outcomes
    pub fn all() -> [Self; 6] {
        [
            Self::Success,
            Self::HttpError,
            Self::TransportError,
            Self::RateLimited,
            Self::RobotsDenied,
            Self::InvalidUrl,
        ]
    }
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// One row of crawl output
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    /// The URL as it was submitted
    pub url: String,

    /// URL after redirects; equals `url` when nothing was fetched
    pub final_url: String,

    pub outcome: CrawlOutcome,

    /// HTTP status, 0 when there was no response
    pub status_code: u16,

    pub content_type: String,

    pub body: String,

    /// Error description for failures and skips
    pub error: Option<String>,

    pub elapsed_ms: u64,

    /// Body length in bytes
    pub content_length: u64,

    pub redirect_count: u32,

    /// Number of times the URL was re-enqueued after throttling
    pub retry_count: u32,

    /// JSON-LD items, for successful HTML pages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonld: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opengraph: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    /// Values of configured extraction fields
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,

    pub fetched_at: DateTime<Utc>,
}

impl CrawlResult {
    /// Builds a result from a fetch response
    ///
    /// The outcome is `Success` for 2xx, `TransportError` when nothing was
    /// received, and `HttpError` otherwise.
    pub fn from_response(url: &str, response: FetchResponse, retry_count: u32) -> Self {
        let outcome = if response.success {
            CrawlOutcome::Success
        } else if response.is_transport_error() {
            CrawlOutcome::TransportError
        } else {
            CrawlOutcome::HttpError
        };

        let final_url = if response.final_url.is_empty() {
            url.to_string()
        } else {
            response.final_url
        };

        Self {
            url: url.to_string(),
            final_url,
            outcome,
            status_code: response.status_code,
            content_type: response.content_type,
            content_length: response.body.len() as u64,
            body: response.body,
            error: response.error,
            elapsed_ms: response.elapsed_ms,
            redirect_count: response.redirect_count,
            retry_count,
            jsonld: None,
            opengraph: None,
            meta: None,
            fields: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Builds a result for a URL that was not fetched
    pub fn failure(url: &str, outcome: CrawlOutcome, error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            outcome,
            status_code: 0,
            content_type: String::new(),
            body: String::new(),
            error: Some(error.into()),
            elapsed_ms: 0,
            content_length: 0,
            redirect_count: 0,
            retry_count,
            jsonld: None,
            opengraph: None,
            meta: None,
            fields: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Whether the body is HTML or XHTML
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.contains("text/html") || content_type.contains("application/xhtml")
    }

    /// Attaches extracted structured data; empty sections stay absent
    pub fn set_structured(&mut self, data: StructuredData) {
        if !data.jsonld.is_empty() {
            self.jsonld = Some(Value::Array(data.jsonld));
        }
        if !data.opengraph.is_empty() {
            self.opengraph = serde_json::to_value(data.opengraph).ok();
        }
        if !data.meta.is_empty() {
            self.meta = serde_json::to_value(data.meta).ok();
        }
    }
}
