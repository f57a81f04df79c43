use crate::config::types::{Config, CrawlerConfig, FetchConfig, OutputConfig, OutputFormat};
use crate::crawler::FieldExpr;
use crate::ConfigError;
use std::collections::BTreeMap;

/// Upper bound for any configured delay, in seconds
const MAX_DELAY_SECONDS: f64 = 86_400.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;
    validate_extract_fields(&config.extract)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_user_agent(&config.user_agent)?;

    if !config.crawl_delay.is_finite()
        || config.crawl_delay < 0.0
        || config.crawl_delay > MAX_DELAY_SECONDS
    {
        return Err(ConfigError::Validation(format!(
            "crawl-delay must be between 0 and {} seconds, got {}",
            MAX_DELAY_SECONDS, config.crawl_delay
        )));
    }

    if config.timeout < 1 || config.timeout > 3600 {
        return Err(ConfigError::Validation(format!(
            "timeout must be between 1 and 3600 seconds, got {}",
            config.timeout
        )));
    }

    if config.max_workers < 1 || config.max_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "max-workers must be between 1 and 64, got {}",
            config.max_workers
        )));
    }

    if !config.backoff_base.is_finite() || config.backoff_base <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "backoff-base must be > 0, got {}",
            config.backoff_base
        )));
    }

    if !config.backoff_cap.is_finite()
        || config.backoff_cap < config.backoff_base
        || config.backoff_cap > MAX_DELAY_SECONDS
    {
        return Err(ConfigError::Validation(format!(
            "backoff-cap must be between backoff-base ({}) and {} seconds, got {}",
            config.backoff_base, MAX_DELAY_SECONDS, config.backoff_cap
        )));
    }

    if !config.fast_response_ms.is_finite() || config.fast_response_ms <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "fast-response-ms must be > 0, got {}",
            config.fast_response_ms
        )));
    }

    if let Some(code) = config
        .throttle_status_codes
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        return Err(ConfigError::Validation(format!(
            "throttle-status-codes must be HTTP statuses, got {}",
            code
        )));
    }

    Ok(())
}

/// The user agent must be a non-empty, printable header value
fn validate_user_agent(user_agent: &str) -> Result<(), ConfigError> {
    if user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if user_agent.chars().any(|c| c.is_control()) {
        return Err(ConfigError::Validation(format!(
            "user-agent must not contain control characters, got {:?}",
            user_agent
        )));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "fetch max-retries must be at most 10, got {}",
            config.max_retries
        )));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be at most 20, got {}",
            config.max_redirects
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.format == OutputFormat::Sqlite && config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty when format is sqlite".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_extract_fields(fields: &BTreeMap<String, String>) -> Result<(), ConfigError> {
    for (name, expr) in fields {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "extract field names cannot be empty".to_string(),
            ));
        }

        match FieldExpr::parse(expr) {
            FieldExpr::Css(selector) => {
                if scraper::Selector::parse(&selector).is_err() {
                    return Err(ConfigError::Validation(format!(
                        "extract field '{}' has an invalid CSS selector: '{}'",
                        name, expr
                    )));
                }
            }
            FieldExpr::Path(path) => {
                if path.split('.').filter(|s| !s.is_empty()).count() < 2 {
                    return Err(ConfigError::Validation(format!(
                        "extract field '{}' has an incomplete path: '{}'",
                        name, expr
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_user_agent() {
        assert!(validate_user_agent("RippleCrawl/1.0 (+https://example.com)").is_ok());
        assert!(validate_user_agent("").is_err());
        assert!(validate_user_agent("   ").is_err());
        assert!(validate_user_agent("bad\nagent").is_err());
    }

    #[test]
    fn test_negative_crawl_delay_rejected() {
        let mut config = Config::default();
        config.crawler.crawl_delay = -0.5;
        assert!(validate(&config).is_err());

        config.crawler.crawl_delay = f64::NAN;
        assert!(validate(&config).is_err());

        config.crawler.crawl_delay = 1e300;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_worker_bounds() {
        let mut config = Config::default();
        config.crawler.max_workers = 0;
        assert!(validate(&config).is_err());

        config.crawler.max_workers = 64;
        assert!(validate(&config).is_ok());

        config.crawler.max_workers = 65;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backoff_cap_below_base_rejected() {
        let mut config = Config::default();
        config.crawler.backoff_base = 10.0;
        config.crawler.backoff_cap = 5.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_throttle_codes_must_be_statuses() {
        let mut config = Config::default();
        config.crawler.throttle_status_codes = vec![429, 503];
        assert!(validate(&config).is_ok());

        config.crawler.throttle_status_codes = vec![42];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sqlite_needs_database_path() {
        let mut config = Config::default();
        config.output.format = OutputFormat::Sqlite;
        config.output.database_path = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_extract_fields() {
        let mut config = Config::default();
        config.extract.insert("title".into(), "h1.title".into());
        config.extract.insert("price".into(), "jsonld.Product.offers.price".into());
        assert!(validate(&config).is_ok());

        config.extract.insert("broken".into(), "div[[".into());
        assert!(validate(&config).is_err());
    }
}
