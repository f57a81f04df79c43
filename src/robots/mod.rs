//! Robots.txt handling module
//!
//! This module fetches and parses robots.txt files and answers whether a
//! path may be crawled and how slowly a site asks to be crawled.

mod parser;

pub use parser::{RobotsData, RobotsRules};

use crate::crawler::{FetchOptions, Fetcher};
use crate::url::robots_url;
use url::Url;

/// Fetches and parses robots.txt for the site a URL belongs to
///
/// Failures are never fatal: a transport error or a non-2xx status yields
/// empty data, which allows everything.
///
/// # Arguments
///
/// * `fetcher` - The fetch service to use
/// * `page_url` - Any URL on the site
/// * `options` - Fetch options (user agent, timeout)
///
/// # Returns
///
/// The parsed robots.txt data, or empty data if it could not be retrieved
pub async fn fetch_robots(fetcher: &dyn Fetcher, page_url: &Url, options: &FetchOptions) -> RobotsData {
    let Some(robots_url) = robots_url(page_url) else {
        return RobotsData::default();
    };

    let response = fetcher.fetch(robots_url.as_str(), options).await;

    if response.success {
        let data = RobotsData::parse(&response.body);
        tracing::debug!(
            "Parsed {} ({} agent blocks, {} sitemaps)",
            robots_url,
            data.user_agents.len(),
            data.sitemaps.len()
        );
        return data;
    }

    match &response.error {
        Some(error) => tracing::warn!("Failed to fetch {}: {}; allowing all", robots_url, error),
        None => tracing::warn!(
            "{} returned HTTP {}; allowing all",
            robots_url,
            response.status_code
        ),
    }
    RobotsData::default()
}

/// Checks if a request path is allowed by robots.txt for a user agent
///
/// # Arguments
///
/// * `robots` - The parsed robots.txt data
/// * `path` - The request path (with query string)
/// * `user_agent` - The user agent string
///
/// # Returns
///
/// * `true` - If the path is allowed
/// * `false` - If the path is disallowed
pub fn is_allowed(robots: &RobotsData, path: &str, user_agent: &str) -> bool {
    robots.rules_for(user_agent).is_allowed(path)
}
