use crate::config::CrawlerConfig;
use crate::robots::RobotsRules;
use std::time::Duration;
use tokio::time::Instant;

/// Responses averaged with a plain mean before the EMA takes over
pub const EMA_WARMUP: u32 = 5;

/// Weight of the newest sample in the response-time EMA
pub const EMA_ALPHA: f64 = 0.3;

/// Factor applied to the crawl delay when a domain responds quickly
pub const RELAX_FACTOR: f64 = 0.75;

/// Longest delay a robots.txt file can impose, in seconds
pub const MAX_ROBOTS_DELAY_SECONDS: f64 = 86_400.0;

/// Tuning for adaptive per-domain pacing
#[derive(Debug, Clone, PartialEq)]
pub struct PacingPolicy {
    /// First throttling backoff
    pub backoff_base: Duration,

    /// Upper bound for backoff and for the effective crawl delay
    pub backoff_cap: Duration,

    /// Average response time below which the delay relaxes
    pub fast_response_ms: f64,
}

impl PacingPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            backoff_base: Duration::from_secs_f64(config.backoff_base),
            backoff_cap: Duration::from_secs_f64(config.backoff_cap),
            fast_response_ms: config.fast_response_ms,
        }
    }

    /// Backoff for the given number of consecutive throttling responses
    ///
    /// `base * 2^consecutive`, capped. Non-decreasing in `consecutive`.
    pub fn backoff_for(&self, consecutive: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(consecutive))
            .min(self.backoff_cap)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            fast_response_ms: 1000.0,
        }
    }
}

/// Tracks the state of a domain during crawling
///
/// This structure holds everything needed to pace requests to one domain:
/// robots.txt rules, spacing, throttling backoff and response statistics.
/// It is always accessed under the domain's lock in [`super::DomainRegistry`].
#[derive(Debug, Clone)]
pub struct DomainState {
    /// When the last request to this domain was started (or finished)
    pub last_crawl_time: Option<Instant>,

    /// Current effective spacing between requests, in seconds
    pub crawl_delay_seconds: f64,

    /// Floor for `crawl_delay_seconds`: max of the configured delay and robots.txt
    pub min_crawl_delay_seconds: f64,

    /// robots.txt rules for our user agent
    pub rules: RobotsRules,

    /// Whether robots.txt has been consulted for this domain
    pub robots_fetched: bool,

    /// Whether robots.txt specified a delay
    pub has_crawl_delay: bool,

    /// Throttling responses since the last normal response
    pub consecutive_429s: u32,

    /// No request may start before this instant
    pub blocked_until: Option<Instant>,

    /// Requests currently in flight
    pub active_requests: u32,

    /// Mean response time in milliseconds
    pub average_response_ms: f64,

    /// Responses contributing to `average_response_ms`
    pub response_count: u32,

    pub urls_crawled: u32,
    pub urls_failed: u32,
    pub urls_skipped: u32,
}

impl DomainState {
    /// Creates a new DomainState using the configured delay as both the
    /// starting delay and the floor
    pub fn new(default_delay_seconds: f64) -> Self {
        let delay = default_delay_seconds.max(0.0);
        Self {
            last_crawl_time: None,
            crawl_delay_seconds: delay,
            min_crawl_delay_seconds: delay,
            rules: RobotsRules::default(),
            robots_fetched: false,
            has_crawl_delay: false,
            consecutive_429s: 0,
            blocked_until: None,
            active_requests: 0,
            average_response_ms: 0.0,
            response_count: 0,
            urls_crawled: 0,
            urls_failed: 0,
            urls_skipped: 0,
        }
    }

    /// Installs robots.txt rules and raises the delay floor to what they ask for
    pub fn apply_robots(&mut self, rules: RobotsRules) {
        if let Some(delay) = rules.effective_delay() {
            let delay = delay.min(MAX_ROBOTS_DELAY_SECONDS);
            self.has_crawl_delay = true;
            self.min_crawl_delay_seconds = self.min_crawl_delay_seconds.max(delay);
            self.crawl_delay_seconds = self.crawl_delay_seconds.max(self.min_crawl_delay_seconds);
        }
        self.rules = rules;
        self.robots_fetched = true;
    }

    /// Copies pacing state gathered during discovery into this entry
    ///
    /// Counters and throttling state are left untouched.
    pub fn seed_from(&mut self, source: &DomainState) {
        self.last_crawl_time = source.last_crawl_time;
        self.crawl_delay_seconds = source.crawl_delay_seconds;
        self.min_crawl_delay_seconds = source.min_crawl_delay_seconds;
        self.rules = source.rules.clone();
        self.robots_fetched = source.robots_fetched;
        self.has_crawl_delay = source.has_crawl_delay;
    }

    /// Checks a request path against the stored robots.txt rules
    pub fn is_allowed(&self, path: &str) -> bool {
        self.rules.is_allowed(path)
    }

    /// Current spacing between requests
    pub fn crawl_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.crawl_delay_seconds).unwrap_or_default()
    }

    /// The earliest instant the next request may start, never before `now`
    pub fn ready_at(&self, now: Instant) -> Instant {
        let mut ready = now;
        if let Some(last) = self.last_crawl_time {
            ready = ready.max(last + self.crawl_delay());
        }
        if let Some(blocked) = self.blocked_until {
            ready = ready.max(blocked);
        }
        ready
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let ready = self.ready_at(now);
        (ready > now).then(|| ready - now)
    }

    /// Records that a request is starting now
    pub fn claim(&mut self, now: Instant) {
        self.last_crawl_time = Some(now);
        self.active_requests += 1;
    }

    /// Records that an in-flight request has finished
    pub fn finish_request(&mut self, now: Instant) {
        self.active_requests = self.active_requests.saturating_sub(1);
        self.last_crawl_time = Some(self.last_crawl_time.map_or(now, |last| last.max(now)));
    }

    /// Folds a normal (non-throttling) response into the pacing state
    ///
    /// # Arguments
    ///
    /// * `elapsed_ms` - How long the response took
    /// * `ok` - Whether it was a 2xx response
    /// * `policy` - Pacing tuning
    pub fn record_response(&mut self, elapsed_ms: f64, ok: bool, policy: &PacingPolicy) {
        self.response_count += 1;
        if self.response_count <= EMA_WARMUP {
            self.average_response_ms +=
                (elapsed_ms - self.average_response_ms) / self.response_count as f64;
        } else {
            self.average_response_ms =
                EMA_ALPHA * elapsed_ms + (1.0 - EMA_ALPHA) * self.average_response_ms;
        }

        self.consecutive_429s = 0;

        if ok
            && self.average_response_ms < policy.fast_response_ms
            && self.crawl_delay_seconds > self.min_crawl_delay_seconds
        {
            self.crawl_delay_seconds =
                (self.crawl_delay_seconds * RELAX_FACTOR).max(self.min_crawl_delay_seconds);
        }
    }

    /// Records a throttling response and blocks the domain
    ///
    /// # Arguments
    ///
    /// * `now` - When the response arrived
    /// * `retry_after` - Server-requested wait, if any
    /// * `policy` - Pacing tuning
    ///
    /// # Returns
    ///
    /// The instant before which no request to this domain may start
    pub fn record_throttle(
        &mut self,
        now: Instant,
        retry_after: Option<Duration>,
        policy: &PacingPolicy,
    ) -> Instant {
        self.consecutive_429s += 1;

        let mut backoff = policy.backoff_for(self.consecutive_429s);
        if let Some(requested) = retry_after {
            backoff = backoff.max(requested).min(policy.backoff_cap);
        }

        let horizon = self
            .blocked_until
            .map_or(now + backoff, |blocked| blocked.max(now + backoff));
        self.blocked_until = Some(horizon);

        let cap = policy.backoff_cap.as_secs_f64();
        let grown = (self.crawl_delay_seconds * 2.0)
            .max(policy.backoff_base.as_secs_f64())
            .min(cap);
        self.crawl_delay_seconds = grown.max(self.min_crawl_delay_seconds);

        horizon
    }

    /// Whether the domain is still inside a throttling block
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|blocked| blocked > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_policy() -> PacingPolicy {
        PacingPolicy {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            fast_response_ms: 1000.0,
        }
    }

    #[test]
    fn test_new_domain_state() {
        let state = DomainState::new(0.5);
        assert_eq!(state.crawl_delay_seconds, 0.5);
        assert_eq!(state.min_crawl_delay_seconds, 0.5);
        assert!(state.last_crawl_time.is_none());
        assert!(!state.robots_fetched);
        assert_eq!(state.active_requests, 0);
    }

    #[test]
    fn test_ready_immediately_when_fresh() {
        let state = DomainState::new(2.0);
        let now = Instant::now();
        assert_eq!(state.ready_at(now), now);
        assert!(state.time_until_next_request(now).is_none());
    }

    #[test]
    fn test_spacing_after_claim() {
        let mut state = DomainState::new(2.0);
        let now = Instant::now();
        state.claim(now);

        assert_eq!(state.active_requests, 1);
        assert_eq!(state.ready_at(now), now + Duration::from_secs(2));
        assert_eq!(
            state.time_until_next_request(now + Duration::from_millis(500)),
            Some(Duration::from_millis(1500))
        );
        assert!(state
            .time_until_next_request(now + Duration::from_secs(2))
            .is_none());
    }

    #[test]
    fn test_finish_request_keeps_latest_time() {
        let mut state = DomainState::new(1.0);
        let start = Instant::now();
        state.claim(start);
        let end = start + Duration::from_millis(300);
        state.finish_request(end);

        assert_eq!(state.active_requests, 0);
        assert_eq!(state.last_crawl_time, Some(end));

        state.finish_request(start);
        assert_eq!(state.active_requests, 0);
        assert_eq!(state.last_crawl_time, Some(end));
    }

    #[test]
    fn test_apply_robots_raises_floor() {
        let mut state = DomainState::new(0.2);
        state.apply_robots(RobotsRules {
            crawl_delay: Some(2.0),
            ..Default::default()
        });

        assert!(state.robots_fetched);
        assert!(state.has_crawl_delay);
        assert_eq!(state.min_crawl_delay_seconds, 2.0);
        assert_eq!(state.crawl_delay_seconds, 2.0);
    }

    #[test]
    fn test_apply_robots_never_lowers_configured_delay() {
        let mut state = DomainState::new(3.0);
        state.apply_robots(RobotsRules {
            crawl_delay: Some(1.0),
            ..Default::default()
        });
        assert_eq!(state.min_crawl_delay_seconds, 3.0);
        assert_eq!(state.crawl_delay_seconds, 3.0);
    }

    #[test]
    fn test_apply_robots_clamps_absurd_delay() {
        let mut state = DomainState::new(0.2);
        state.apply_robots(RobotsRules {
            crawl_delay: Some(1e30),
            ..Default::default()
        });
        assert_eq!(state.min_crawl_delay_seconds, MAX_ROBOTS_DELAY_SECONDS);

        let now = Instant::now();
        state.claim(now);
        assert_eq!(
            state.ready_at(now),
            now + Duration::from_secs_f64(MAX_ROBOTS_DELAY_SECONDS)
        );
    }

    #[test]
    fn test_apply_robots_without_delay() {
        let mut state = DomainState::new(0.2);
        state.apply_robots(RobotsRules {
            disallow: vec!["/private".to_string()],
            ..Default::default()
        });
        assert!(state.robots_fetched);
        assert!(!state.has_crawl_delay);
        assert!(!state.is_allowed("/private/x"));
        assert!(state.is_allowed("/public"));
    }

    #[test]
    fn test_ema_warmup_then_smoothing() {
        let policy = create_test_policy();
        let mut state = DomainState::new(0.0);

        for sample in [100.0, 200.0, 300.0, 400.0, 500.0] {
            state.record_response(sample, true, &policy);
        }
        assert!((state.average_response_ms - 300.0).abs() < 1e-9);

        state.record_response(1300.0, true, &policy);
        // 0.3 * 1300 + 0.7 * 300
        assert!((state.average_response_ms - 600.0).abs() < 1e-9);
        assert_eq!(state.response_count, 6);
    }

    #[test]
    fn test_fast_responses_relax_delay_to_floor() {
        let policy = create_test_policy();
        let mut state = DomainState::new(1.0);
        state.crawl_delay_seconds = 4.0;

        state.record_response(100.0, true, &policy);
        assert!((state.crawl_delay_seconds - 3.0).abs() < 1e-9);

        for _ in 0..20 {
            state.record_response(100.0, true, &policy);
        }
        assert_eq!(state.crawl_delay_seconds, 1.0);
    }

    #[test]
    fn test_slow_or_failed_responses_do_not_relax() {
        let policy = create_test_policy();
        let mut state = DomainState::new(1.0);
        state.crawl_delay_seconds = 4.0;

        state.record_response(5000.0, true, &policy);
        assert_eq!(state.crawl_delay_seconds, 4.0);

        let mut state = DomainState::new(1.0);
        state.crawl_delay_seconds = 4.0;
        state.record_response(100.0, false, &policy);
        assert_eq!(state.crawl_delay_seconds, 4.0);
    }

    #[test]
    fn test_throttle_blocks_and_grows_delay() {
        let policy = create_test_policy();
        let mut state = DomainState::new(0.2);
        let now = Instant::now();

        let horizon = state.record_throttle(now, None, &policy);

        assert_eq!(state.consecutive_429s, 1);
        assert_eq!(horizon, now + Duration::from_secs(2));
        assert_eq!(state.blocked_until, Some(horizon));
        assert!(state.is_blocked(now));
        assert_eq!(state.ready_at(now), horizon);
        assert_eq!(state.crawl_delay_seconds, 1.0);

        state.record_throttle(now, None, &policy);
        assert_eq!(state.crawl_delay_seconds, 2.0);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = create_test_policy();
        let mut previous = Duration::ZERO;
        for consecutive in 0..40 {
            let backoff = policy.backoff_for(consecutive);
            assert!(backoff >= previous);
            assert!(backoff <= policy.backoff_cap);
            previous = backoff;
        }
        assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_resets_after_normal_response() {
        let policy = create_test_policy();
        let mut state = DomainState::new(0.0);
        let now = Instant::now();

        state.record_throttle(now, None, &policy);
        state.record_throttle(now, None, &policy);
        assert_eq!(state.consecutive_429s, 2);

        state.record_response(100.0, false, &policy);
        assert_eq!(state.consecutive_429s, 0);

        let later = now + Duration::from_secs(100);
        let horizon = state.record_throttle(later, None, &policy);
        assert_eq!(horizon, later + policy.backoff_for(1));
    }

    #[test]
    fn test_retry_after_raises_backoff_within_cap() {
        let policy = create_test_policy();
        let now = Instant::now();

        let mut state = DomainState::new(0.0);
        let horizon = state.record_throttle(now, Some(Duration::from_secs(10)), &policy);
        assert_eq!(horizon, now + Duration::from_secs(10));

        let mut state = DomainState::new(0.0);
        let horizon = state.record_throttle(now, Some(Duration::from_secs(3600)), &policy);
        assert_eq!(horizon, now + Duration::from_secs(30));
    }

    #[test]
    fn test_throttle_delay_respects_floor_and_cap() {
        let policy = create_test_policy();
        let now = Instant::now();

        let mut state = DomainState::new(0.0);
        state.crawl_delay_seconds = 25.0;
        state.record_throttle(now, None, &policy);
        assert_eq!(state.crawl_delay_seconds, 30.0);

        let mut state = DomainState::new(45.0);
        state.record_throttle(now, None, &policy);
        assert_eq!(state.crawl_delay_seconds, 45.0);
    }

    #[test]
    fn test_seed_from_copies_pacing_fields() {
        let mut discovered = DomainState::new(0.2);
        discovered.apply_robots(RobotsRules {
            disallow: vec!["/x".to_string()],
            crawl_delay: Some(5.0),
            ..Default::default()
        });
        discovered.last_crawl_time = Some(Instant::now());
        discovered.urls_crawled = 7;

        let mut state = DomainState::new(0.2);
        state.seed_from(&discovered);

        assert_eq!(state.crawl_delay_seconds, 5.0);
        assert_eq!(state.min_crawl_delay_seconds, 5.0);
        assert!(state.robots_fetched);
        assert!(state.has_crawl_delay);
        assert_eq!(state.last_crawl_time, discovered.last_crawl_time);
        assert!(!state.is_allowed("/x"));
        assert_eq!(state.urls_crawled, 0);
    }
}
