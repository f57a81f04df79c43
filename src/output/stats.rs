//! Crawl statistics
//!
//! Counters are accumulated from the result stream as it is consumed and
//! combined with the per-domain registry snapshot at the end of the run.

use crate::crawler::{CrawlOutcome, CrawlResult};
use crate::state::DomainSummary;
use std::collections::BTreeMap;
use std::time::Duration;

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    /// Total number of results received
    pub total_results: u64,

    /// Count of results by outcome
    pub results_by_outcome: BTreeMap<CrawlOutcome, u64>,

    /// Body bytes downloaded for successful fetches
    pub bytes_downloaded: u64,

    /// Sum of request times across all fetched results
    pub total_elapsed_ms: u64,

    /// Results that needed at least one throttle retry
    pub retried_results: u64,

    /// Per-domain pacing state at the end of the run
    pub domains: Vec<DomainSummary>,

    /// Wall-clock duration of the run
    pub duration: Option<Duration>,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one result to the counters
    pub fn record(&mut self, result: &CrawlResult) {
        self.total_results += 1;
        *self.results_by_outcome.entry(result.outcome).or_insert(0) += 1;
        self.total_elapsed_ms += result.elapsed_ms;
        if result.outcome.is_success() {
            self.bytes_downloaded += result.content_length;
        }
        if result.retry_count > 0 {
            self.retried_results += 1;
        }
    }

    pub fn count(&self, outcome: CrawlOutcome) -> u64 {
        self.results_by_outcome.get(&outcome).copied().unwrap_or(0)
    }

    /// Number of results that represent errors
    pub fn error_count(&self) -> u64 {
        self.results_by_outcome
            .iter()
            .filter(|(outcome, _)| outcome.is_error())
            .map(|(_, count)| count)
            .sum()
    }

    /// Number of URLs that were never requested
    pub fn skipped_count(&self) -> u64 {
        self.results_by_outcome
            .iter()
            .filter(|(outcome, _)| outcome.is_skipped())
            .map(|(_, count)| count)
            .sum()
    }

    /// Percentage of results that were successful
    pub fn success_rate(&self) -> f64 {
        if self.total_results == 0 {
            return 0.0;
        }
        (self.count(CrawlOutcome::Success) as f64 / self.total_results as f64) * 100.0
    }

    /// Domains that were throttled at least once, with their final delay
    pub fn throttled_domains(&self) -> Vec<&DomainSummary> {
        self.domains
            .iter()
            .filter(|d| d.consecutive_429s > 0 || d.crawl_delay_seconds > d.min_crawl_delay_seconds)
            .collect()
    }
}

/// Prints statistics to stderr in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStats) {
    eprintln!("=== Crawl Statistics ===\n");

    eprintln!("Overview:");
    eprintln!("  Results: {}", stats.total_results);
    eprintln!("  Domains: {}", stats.domains.len());
    eprintln!("  Bytes downloaded: {}", stats.bytes_downloaded);
    if let Some(duration) = stats.duration {
        eprintln!("  Duration: {:.1}s", duration.as_secs_f64());
    }
    eprintln!();

    eprintln!("Results by Outcome:");
    for outcome in CrawlOutcome::all() {
        let count = stats.count(outcome);
        if count == 0 {
            continue;
        }
        let percentage = if stats.total_results > 0 {
            (count as f64 / stats.total_results as f64) * 100.0
        } else {
            0.0
        };
        eprintln!("  {}: {} ({:.1}%)", outcome, count, percentage);
    }
    eprintln!();

    if !stats.domains.is_empty() {
        eprintln!("Domains:");
        for domain in &stats.domains {
            eprintln!(
                "  {}: {} crawled, {} failed, {} skipped, delay {:.2}s (floor {:.2}s), avg {:.0}ms",
                domain.domain,
                domain.urls_crawled,
                domain.urls_failed,
                domain.urls_skipped,
                domain.crawl_delay_seconds,
                domain.min_crawl_delay_seconds,
                domain.average_response_ms
            );
        }
        eprintln!();
    }

    let throttled = stats.throttled_domains();
    if !throttled.is_empty() {
        eprintln!("Throttled Domains ({}):", throttled.len());
        for domain in throttled {
            eprintln!("  - {}", domain.domain);
        }
        eprintln!();
    }

    eprintln!(
        "Success Rate: {:.1}% ({} / {} results, {} retried after throttling)",
        stats.success_rate(),
        stats.count(CrawlOutcome::Success),
        stats.total_results,
        stats.retried_results
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FetchResponse;

    fn summary(domain: &str, delay: f64, floor: f64, throttles: u32) -> DomainSummary {
        DomainSummary {
            domain: domain.to_string(),
            crawl_delay_seconds: delay,
            min_crawl_delay_seconds: floor,
            has_crawl_delay: false,
            average_response_ms: 120.0,
            consecutive_429s: throttles,
            urls_crawled: 1,
            urls_failed: 0,
            urls_skipped: 0,
        }
    }

    #[test]
    fn test_record_counts_outcomes() {
        let mut stats = CrawlStats::new();

        let mut ok = CrawlResult::from_response(
            "https://a.example/",
            FetchResponse::ok("https://a.example/", 200, "text/html", "12345"),
            2,
        );
        ok.elapsed_ms = 40;
        stats.record(&ok);
        stats.record(&CrawlResult::from_response(
            "https://a.example/x",
            FetchResponse::ok("https://a.example/x", 404, "text/html", "missing"),
            0,
        ));
        stats.record(&CrawlResult::failure(
            "https://a.example/p",
            CrawlOutcome::RobotsDenied,
            "Disallowed by robots.txt",
            0,
        ));

        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.count(CrawlOutcome::Success), 1);
        assert_eq!(stats.error_count(), 1);
        assert_eq!(stats.skipped_count(), 1);
        assert_eq!(stats.bytes_downloaded, 5);
        assert_eq!(stats.total_elapsed_ms, 40);
        assert_eq!(stats.retried_results, 1);
        assert!((stats.success_rate() - 33.33).abs() < 0.1);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(CrawlStats::new().success_rate(), 0.0);
    }

    #[test]
    fn test_throttled_domains() {
        let stats = CrawlStats {
            domains: vec![
                summary("calm.example", 1.0, 1.0, 0),
                summary("busy.example", 4.0, 1.0, 0),
                summary("angry.example", 8.0, 1.0, 3),
            ],
            ..Default::default()
        };

        let names: Vec<&str> = stats
            .throttled_domains()
            .iter()
            .map(|d| d.domain.as_str())
            .collect();
        assert_eq!(names, vec!["busy.example", "angry.example"]);
    }
}
