//! Robots.txt parser implementation
//!
//! Parsing is lenient: unknown directives and malformed lines are skipped,
//! invalid numbers are ignored, and the result is always usable.

use std::collections::HashMap;

/// Rules that apply to a single user agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    /// Path prefixes the agent may not fetch
    pub disallow: Vec<String>,

    /// Path prefixes the agent may fetch; checked before `disallow`
    pub allow: Vec<String>,

    /// `Crawl-delay` in seconds
    pub crawl_delay: Option<f64>,

    /// `Request-rate` converted to seconds per request
    pub request_rate: Option<f64>,
}

impl RobotsRules {
    /// Checks whether a request path may be fetched under these rules
    ///
    /// Any matching `Allow` prefix wins outright. Otherwise a matching
    /// non-empty `Disallow` prefix denies. No match allows.
    ///
    /// # Arguments
    ///
    /// * `path` - The path (with query string) being requested, e.g. `/page?id=1`
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.allow.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return true;
        }

        !self
            .disallow
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Returns the delay these rules ask for, in seconds
    ///
    /// When both `Crawl-delay` and `Request-rate` are present the larger one
    /// is used.
    pub fn effective_delay(&self) -> Option<f64> {
        match (self.crawl_delay, self.request_rate) {
            (Some(delay), Some(rate)) => Some(delay.max(rate)),
            (Some(delay), None) => Some(delay),
            (None, rate) => rate,
        }
    }

    /// Whether the site specified any pacing for this agent
    pub fn has_delay(&self) -> bool {
        self.effective_delay().is_some()
    }
}

/// A parsed robots.txt file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsData {
    /// Rule blocks keyed by lowercased user agent
    pub user_agents: HashMap<String, RobotsRules>,

    /// `Sitemap:` URLs in file order
    pub sitemaps: Vec<String>,
}

impl RobotsData {
    /// Parses robots.txt content
    ///
    /// Directive names are case-insensitive. A `User-agent:` line opens a
    /// rule block; repeated blocks for the same agent are merged. `Sitemap:`
    /// lines are global and may appear anywhere.
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt body
    ///
    /// # Returns
    ///
    /// The parsed data; malformed input yields whatever could be understood
    pub fn parse(content: &str) -> Self {
        let mut data = RobotsData::default();
        let mut current: Option<String> = None;

        for raw_line in content.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    let agent = value.to_ascii_lowercase();
                    if agent.is_empty() {
                        continue;
                    }
                    data.user_agents.entry(agent.clone()).or_default();
                    current = Some(agent);
                }
                "sitemap" => {
                    if !value.is_empty() {
                        data.sitemaps.push(value.to_string());
                    }
                }
                _ => {
                    let Some(rules) = current
                        .as_ref()
                        .and_then(|agent| data.user_agents.get_mut(agent))
                    else {
                        continue;
                    };
                    apply_directive(rules, &directive, value);
                }
            }
        }

        data
    }

    /// Selects the rules for a user agent
    ///
    /// Matching is case-insensitive: an exact entry wins, then the longest
    /// entry that is a prefix of the agent, then `*`. With no match at all
    /// the empty (allow everything) rules are returned.
    pub fn rules_for(&self, user_agent: &str) -> RobotsRules {
        let agent = user_agent.trim().to_ascii_lowercase();

        if let Some(rules) = self.user_agents.get(&agent) {
            return rules.clone();
        }

        let prefix_match = self
            .user_agents
            .iter()
            .filter(|(key, _)| key.as_str() != "*" && agent.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        if let Some((_, rules)) = prefix_match {
            return rules.clone();
        }

        self.user_agents.get("*").cloned().unwrap_or_default()
    }
}

fn apply_directive(rules: &mut RobotsRules, directive: &str, value: &str) {
    match directive {
        "disallow" => {
            if !value.is_empty() {
                rules.disallow.push(value.to_string());
            }
        }
        "allow" => {
            if !value.is_empty() {
                rules.allow.push(value.to_string());
            }
        }
        "crawl-delay" => {
            if let Some(delay) = leading_number(value).filter(|d| *d >= 0.0) {
                rules.crawl_delay = Some(delay);
            }
        }
        "request-rate" => {
            if let Some(seconds) = parse_request_rate(value) {
                rules.request_rate = Some(seconds);
            }
        }
        _ => {}
    }
}

/// Converts `n/m` (n requests per m seconds) into seconds per request
fn parse_request_rate(value: &str) -> Option<f64> {
    let (requests, seconds) = value.split_once('/')?;
    let requests = leading_number(requests.trim())?;
    let seconds = leading_number(seconds.trim())?;
    if requests > 0.0 && seconds > 0.0 {
        Some(seconds / requests)
    } else {
        None
    }
}

/// Parses the numeric prefix of a value, so `10s` reads as 10
fn leading_number(value: &str) -> Option<f64> {
    let end = value
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse::<f64>().ok().filter(|n| n.is_finite())
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}
