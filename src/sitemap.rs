//! Sitemap parsing and URL discovery
//!
//! Discovery turns a site address into a crawl list: robots.txt is fetched
//! for its `Sitemap:` declarations (with well-known sitemap locations as the
//! fallback), sitemap indexes are followed breadth-first, and the page URLs
//! they list are collected. The robots.txt rules and request timing gathered
//! along the way are returned as a [`DomainState`] so the crawl can pick up
//! the domain's pacing where discovery left off.

use crate::config::CrawlerConfig;
use crate::crawler::{FetchOptions, Fetcher};
use crate::robots::fetch_robots;
use crate::state::DomainState;
use crate::url::{extract_domain, parse_crawl_url, request_path};
use crate::{Result, UrlError};
use chrono::{DateTime, FixedOffset};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use sitemap::structs::ChangeFreq;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use tokio::time::Instant;
use url::Url;

/// One `<url>` entry of a sitemap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<DateTime<FixedOffset>>,
    pub changefreq: Option<String>,
    pub priority: Option<f32>,
}

/// Parsed contents of one sitemap document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapData {
    /// Page entries (regular sitemaps)
    pub urls: Vec<SitemapEntry>,

    /// Nested sitemap locations (sitemap indexes)
    pub sitemap_urls: Vec<String>,

    pub is_index: bool,
}

/// Parses sitemap or sitemap index XML
///
/// Entries whose `<loc>` is missing or not a valid URL are dropped. Parsing
/// stops quietly at the first malformed part of the document, keeping what
/// was read up to that point.
pub fn parse_sitemap(xml: &str) -> SitemapData {
    let mut data = SitemapData::default();

    for entity in SiteMapReader::new(Cursor::new(xml.as_bytes())) {
        match entity {
            SiteMapEntity::Url(entry) => {
                let Some(loc) = entry.loc.get_url() else {
                    continue;
                };
                data.urls.push(SitemapEntry {
                    loc: loc.to_string(),
                    lastmod: entry.lastmod.get_time(),
                    changefreq: changefreq_name(&entry.changefreq),
                    priority: entry.priority.get_priority(),
                });
            }
            SiteMapEntity::SiteMap(entry) => {
                data.is_index = true;
                if let Some(loc) = entry.loc.get_url() {
                    data.sitemap_urls.push(loc.to_string());
                }
            }
            _ => {}
        }
    }
    data
}

/// Well-known sitemap locations, most common first
pub fn common_sitemap_paths() -> &'static [&'static str] {
    &[
        "/sitemap.xml",
        "/sitemap_index.xml",
        "/sitemap-index.xml",
        "/sitemapindex.xml",
        "/sitemap/sitemap.xml",
        "/sitemaps/sitemap.xml",
        "/sitemap1.xml",
        "/wp-sitemap.xml",
    ]
}

/// Lowercase `<changefreq>` value, or `None` when absent or unrecognised
fn changefreq_name(freq: &ChangeFreq) -> Option<String> {
    let name = format!("{:?}", freq).to_ascii_lowercase();
    (name != "none").then_some(name)
}

/// What discovery found for one site
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Domain key of the site
    pub domain: String,

    /// Pacing and robots.txt state after discovery, for seeding the crawl
    pub state: DomainState,

    /// Sitemaps that were fetched and parsed
    pub sitemaps: Vec<String>,

    /// Page URLs, deduplicated, in sitemap order
    pub urls: Vec<String>,
}

/// Discovers crawlable URLs for a site from its sitemaps
///
/// Requests made here are paced with the same per-domain delay the crawl
/// uses, so handing [`Discovery::state`] to the crawl keeps the spacing
/// intact across the two phases.
///
/// # Arguments
///
/// * `fetcher` - The fetch service to use
/// * `site` - Any URL on the site
/// * `options` - Fetch options (user agent, timeout)
/// * `crawler` - Crawler settings (delay, user agent, robots.txt handling)
/// * `max_sitemaps` - Maximum number of sitemap documents to fetch
///
/// # Returns
///
/// * `Ok(Discovery)` - URLs and domain state (possibly with no URLs)
/// * `Err(CrawlError)` - The site URL is not crawlable
pub async fn discover(
    fetcher: &dyn Fetcher,
    site: &str,
    options: &FetchOptions,
    crawler: &CrawlerConfig,
    max_sitemaps: usize,
) -> Result<Discovery> {
    let site = parse_crawl_url(site)?;
    let domain = extract_domain(&site).ok_or(UrlError::MissingDomain)?;
    let mut state = DomainState::new(crawler.crawl_delay);

    wait_turn(&mut state).await;
    let robots = fetch_robots(fetcher, &site, &options.paced(state.crawl_delay())).await;
    state.finish_request(Instant::now());
    if crawler.respect_robots_txt {
        state.apply_robots(robots.rules_for(&crawler.user_agent));
    }
    // Retries inside a sitemap fetch must keep the domain's spacing too
    let options = options.paced(state.crawl_delay());

    let declared: Vec<String> = robots.sitemaps.clone();
    let mut probing = declared.is_empty();
    let mut pending: VecDeque<String> = if probing {
        common_sitemap_paths()
            .iter()
            .filter_map(|path| site.join(path).ok())
            .map(|url| url.to_string())
            .collect()
    } else {
        declared.into()
    };

    tracing::info!(
        "Discovering {} from {} {} sitemap location(s)",
        domain,
        pending.len(),
        if probing { "well-known" } else { "declared" }
    );

    let mut seen_sitemaps = HashSet::new();
    let mut seen_urls = HashSet::new();
    let mut sitemaps = Vec::new();
    let mut urls = Vec::new();

    while let Some(sitemap_url) = pending.pop_front() {
        if sitemaps.len() >= max_sitemaps {
            tracing::warn!("Sitemap limit ({}) reached for {}", max_sitemaps, domain);
            break;
        }
        if !seen_sitemaps.insert(sitemap_url.clone()) {
            continue;
        }
        if crawler.respect_robots_txt && !sitemap_allowed(&state, &sitemap_url) {
            tracing::debug!("Skipping {}: disallowed by robots.txt", sitemap_url);
            continue;
        }

        wait_turn(&mut state).await;
        let response = fetcher.fetch(&sitemap_url, &options).await;
        state.finish_request(Instant::now());

        if !response.success {
            tracing::debug!(
                "Sitemap {} unavailable (HTTP {})",
                sitemap_url,
                response.status_code
            );
            continue;
        }

        let data = parse_sitemap(&response.body);
        tracing::debug!(
            "Parsed sitemap {}: {} URLs, {} nested sitemaps",
            sitemap_url,
            data.urls.len(),
            data.sitemap_urls.len()
        );
        sitemaps.push(sitemap_url);

        // The first well-known location that answers stands in for the declared list
        if probing {
            pending.clear();
            probing = false;
        }

        pending.extend(data.sitemap_urls);
        for entry in data.urls {
            if seen_urls.insert(entry.loc.clone()) {
                urls.push(entry.loc);
            }
        }
    }

    tracing::info!(
        "Discovered {} URLs for {} from {} sitemap(s)",
        urls.len(),
        domain,
        sitemaps.len()
    );

    Ok(Discovery {
        domain,
        state,
        sitemaps,
        urls,
    })
}

/// Sleeps until the domain may be requested, then claims the request
async fn wait_turn(state: &mut DomainState) {
    let now = Instant::now();
    let ready = state.ready_at(now);
    if ready > now {
        tokio::time::sleep_until(ready).await;
    }
    state.claim(Instant::now());
}

fn sitemap_allowed(state: &DomainState, sitemap_url: &str) -> bool {
    match Url::parse(sitemap_url) {
        Ok(url) => state.is_allowed(&request_path(&url)),
        Err(_) => false,
    }
}
