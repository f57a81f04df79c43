//! URL handling module for Ripple-Crawl
//!
//! This module provides URL validation and the small set of URL-derived keys
//! the scheduler needs: the politeness domain, the robots.txt location and the
//! path string evaluated against robots rules.

mod domain;

use crate::{UrlError, UrlResult};
use url::Url;

// Re-export main functions
pub use domain::{extract_domain, request_path, robots_url};

/// Parses a URL submitted for crawling
///
/// Only absolute `http`/`https` URLs with a host are accepted.
///
/// # Examples
///
/// ```
/// use ripple_crawl::url::parse_crawl_url;
///
/// assert!(parse_crawl_url("https://example.com/page").is_ok());
/// assert!(parse_crawl_url("ftp://example.com/file").is_err());
/// assert!(parse_crawl_url("not a url").is_err());
/// ```
pub fn parse_crawl_url(url_str: &str) -> UrlResult<Url> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_and_https() {
        assert!(parse_crawl_url("http://example.com/").is_ok());
        assert!(parse_crawl_url("https://example.com/a?b=c").is_ok());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let url = parse_crawl_url("  https://example.com/page \n").unwrap();
        assert_eq!(url.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = parse_crawl_url("mailto:someone@example.com");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        let result = parse_crawl_url("/relative/path");
        assert!(matches!(result.unwrap_err(), UrlError::Parse(_)));
    }
}
