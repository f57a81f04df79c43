//! State module for tracking per-domain crawl progress
//!
//! # Components
//!
//! - `DomainState`: pacing, robots.txt rules and counters for one domain
//! - `DomainRegistry`: concurrent map from domain to its locked state
//! - `PacingPolicy`: tuning for backoff and adaptive delays

mod domain_state;
mod registry;

// Re-export main types
pub use domain_state::{DomainState, PacingPolicy, EMA_ALPHA, EMA_WARMUP, RELAX_FACTOR};
pub use registry::{DomainRegistry, DomainSlot, DomainSummary};
