//! Concurrent map of per-domain state
//!
//! Each domain gets its own lock so that work on different domains never
//! contends. The map itself is only locked briefly while an entry is looked
//! up or inserted.

use crate::state::DomainState;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A domain's state behind its own lock
pub type DomainSlot = Mutex<DomainState>;

/// Point-in-time view of one domain, for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSummary {
    pub domain: String,
    pub crawl_delay_seconds: f64,
    pub min_crawl_delay_seconds: f64,
    pub has_crawl_delay: bool,
    pub average_response_ms: f64,
    pub consecutive_429s: u32,
    pub urls_crawled: u32,
    pub urls_failed: u32,
    pub urls_skipped: u32,
}

/// Registry of domain states shared by all workers
#[derive(Debug)]
pub struct DomainRegistry {
    domains: DashMap<String, Arc<DomainSlot>>,
    default_delay_seconds: f64,
}

impl DomainRegistry {
    /// Creates an empty registry
    ///
    /// # Arguments
    ///
    /// * `default_delay_seconds` - Delay and delay floor for new domains
    pub fn new(default_delay_seconds: f64) -> Self {
        Self {
            domains: DashMap::new(),
            default_delay_seconds,
        }
    }

    /// Returns the slot for a domain, creating it on first use
    ///
    /// Concurrent callers for the same new domain all receive the same slot.
    pub fn get_or_create(&self, domain: &str) -> Arc<DomainSlot> {
        if let Some(slot) = self.domains.get(domain) {
            return Arc::clone(slot.value());
        }

        let slot = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(self.default_delay_seconds))));
        Arc::clone(slot.value())
    }

    /// Returns the slot for a domain if it exists
    pub fn try_get(&self, domain: &str) -> Option<Arc<DomainSlot>> {
        self.domains.get(domain).map(|slot| Arc::clone(slot.value()))
    }

    /// Seeds a domain with state gathered during discovery
    ///
    /// Creates the entry if needed, then copies the pacing fields of `source`.
    pub async fn initialize_from_discovery(&self, domain: &str, source: &DomainState) {
        let slot = self.get_or_create(domain);
        slot.lock().await.seed_from(source);
        tracing::debug!(
            "Seeded {} from discovery (delay {:.2}s, robots fetched: {})",
            domain,
            source.crawl_delay_seconds,
            source.robots_fetched
        );
    }

    /// Number of known domains
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Summaries of every domain, sorted by domain name
    pub async fn snapshot(&self) -> Vec<DomainSummary> {
        // Collect first so no map guard is held across the awaits below
        let slots: Vec<(String, Arc<DomainSlot>)> = self
            .domains
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for (domain, slot) in slots {
            let state = slot.lock().await;
            summaries.push(DomainSummary {
                domain,
                crawl_delay_seconds: state.crawl_delay_seconds,
                min_crawl_delay_seconds: state.min_crawl_delay_seconds,
                has_crawl_delay: state.has_crawl_delay,
                average_response_ms: state.average_response_ms,
                consecutive_429s: state.consecutive_429s,
                urls_crawled: state.urls_crawled,
                urls_failed: state.urls_failed,
                urls_skipped: state.urls_skipped,
            });
        }
        summaries.sort_by(|a, b| a.domain.cmp(&b.domain));
        summaries
    }
}
