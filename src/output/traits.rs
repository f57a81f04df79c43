//! Result sink trait and output errors

use crate::crawler::CrawlResult;
use thiserror::Error;

/// Errors that can occur while writing results
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to serialize result: {0}")]
    Format(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for crawl results as they stream in
///
/// `write` is called once per result in completion order; `finish` is
/// called once after the stream ends (including after cancellation) and
/// must leave every written result durable.
pub trait ResultSink {
    fn write(&mut self, result: &CrawlResult) -> OutputResult<()>;

    fn finish(&mut self) -> OutputResult<()>;

    /// Number of results written so far
    fn written(&self) -> u64;
}
