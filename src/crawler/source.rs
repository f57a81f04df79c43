//! Where crawl input comes from

use crate::{CrawlError, Result};
use std::io::BufRead;

/// A supplier of URLs to crawl
///
/// Errors are fatal to the crawl invocation.
pub trait UrlSource {
    fn urls(&mut self) -> Result<Vec<String>>;
}

impl UrlSource for Vec<String> {
    fn urls(&mut self) -> Result<Vec<String>> {
        Ok(std::mem::take(self))
    }
}

/// URLs read one per line; blank lines and `#` comments are skipped
pub struct LineSource<R> {
    reader: R,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> UrlSource for LineSource<R> {
    fn urls(&mut self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for (index, line) in (&mut self.reader).lines().enumerate() {
            let line = line
                .map_err(|e| CrawlError::Source(format!("failed to read line {}: {}", index + 1, e)))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            urls.push(line.to_string());
        }
        Ok(urls)
    }
}
