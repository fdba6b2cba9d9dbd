//! Server configuration
//!
//! Settings come from the process environment (after an optional `.env` is
//! loaded). Every variable has a default; a value that does not parse fails
//! startup with the variable's name.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use driftlog_domain::ingestion::RateLimitConfig;
use driftlog_domain::{EventRules, IngestionConfig, RetryPolicy, StorageConfig};

/// Largest accepted `DRIFTLOG_MAX_FUTURE_SKEW_SECS` (one year)
const MAX_FUTURE_SKEW_LIMIT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub bucket: String,
    pub namespace: String,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub rules: EventRules,
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let millis = |key: &str, default: u64| parse(&lookup, key, default).map(Duration::from_millis);

        let topic_prefix = text("DRIFTLOG_TOPIC_PREFIX", "driftlog.");
        if topic_prefix.is_empty() {
            return Err(anyhow!("DRIFTLOG_TOPIC_PREFIX must not be empty"));
        }

        let requests_per_second: u32 = parse(&lookup, "DRIFTLOG_REQUESTS_PER_SECOND", 0)?;
        let rate_limit = RateLimitConfig {
            max_concurrent_requests: parse(&lookup, "DRIFTLOG_MAX_CONCURRENT_REQUESTS", 64)?,
            acquire_timeout: millis("DRIFTLOG_ADMISSION_TIMEOUT_MS", 1000)?,
            ..RateLimitConfig::per_second(requests_per_second)
        };

        let retry = RetryPolicy {
            max_retries: parse(&lookup, "DRIFTLOG_MAX_RETRIES", 3)?,
            base_delay: millis("DRIFTLOG_BASE_DELAY_MS", 100)?,
            max_delay: millis("DRIFTLOG_MAX_DELAY_MS", 5000)?,
            deadline: None,
        };

        let skew_secs: u64 = parse(&lookup, "DRIFTLOG_MAX_FUTURE_SKEW_SECS", 300)?;
        if skew_secs > MAX_FUTURE_SKEW_LIMIT_SECS {
            return Err(anyhow!(
                "DRIFTLOG_MAX_FUTURE_SKEW_SECS must be at most {}, got {}",
                MAX_FUTURE_SKEW_LIMIT_SECS,
                skew_secs
            ));
        }
        let rules = EventRules {
            max_future_skew: Duration::from_secs(skew_secs),
            ..EventRules::default()
        };

        Ok(Self {
            host: text("DRIFTLOG_HOST", "0.0.0.0"),
            port: parse(&lookup, "DRIFTLOG_PORT", 3000)?,
            topic_prefix,
            bucket: text("DRIFTLOG_BUCKET", "driftlog"),
            namespace: text("DRIFTLOG_NAMESPACE", "warehouse"),
            max_in_flight: parse(&lookup, "DRIFTLOG_S3_MAX_IN_FLIGHT", 16)?,
            retry,
            rate_limit,
            rules,
            max_batch_size: parse(&lookup, "DRIFTLOG_MAX_BATCH_SIZE", 1000)?,
            max_batch_age: millis("DRIFTLOG_MAX_BATCH_AGE_MS", 5000)?,
            flush_interval: millis("DRIFTLOG_FLUSH_INTERVAL_MS", 1000)?,
            channel_capacity: parse(&lookup, "DRIFTLOG_CHANNEL_CAPACITY", 1024)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            topic_prefix: self.topic_prefix.clone(),
            rules: self.rules.clone(),
            rate_limit: self.rate_limit.clone(),
            retry: self.retry.clone(),
            ..IngestionConfig::default()
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            max_batch_size: self.max_batch_size,
            max_batch_age: self.max_batch_age,
            retry: self.retry.clone(),
            ..StorageConfig::default()
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value {:?} for {}: {}", raw, key, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.bind_addr(), "0.0.0.0:3000");
        assert_eq!(settings.topic_prefix, "driftlog.");
        assert_eq!(settings.bucket, "driftlog");
        assert_eq!(settings.namespace, "warehouse");
        assert_eq!(settings.max_in_flight, 16);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(100));
        assert_eq!(settings.rate_limit.max_concurrent_requests, 64);
        assert_eq!(settings.rate_limit.min_interval, Duration::ZERO);
        assert_eq!(settings.rules.max_future_skew, Duration::from_secs(300));
        assert_eq!(settings.max_batch_size, 1000);
        assert_eq!(settings.max_batch_age, Duration::from_secs(5));
        assert_eq!(settings.flush_interval, Duration::from_secs(1));
        assert_eq!(settings.channel_capacity, 1024);
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("DRIFTLOG_PORT", "8080"),
            ("DRIFTLOG_TOPIC_PREFIX", "events."),
            ("DRIFTLOG_MAX_RETRIES", "5"),
            ("DRIFTLOG_REQUESTS_PER_SECOND", "50"),
            ("DRIFTLOG_ADMISSION_TIMEOUT_MS", "250"),
            ("DRIFTLOG_MAX_BATCH_SIZE", "100"),
            ("DRIFTLOG_S3_MAX_IN_FLIGHT", "4"),
        ])
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.max_in_flight, 4);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.rate_limit.min_interval, Duration::from_millis(20));
        assert_eq!(settings.rate_limit.acquire_timeout, Duration::from_millis(250));

        let ingestion = settings.ingestion_config();
        assert_eq!(ingestion.topic_prefix, "events.");
        assert_eq!(ingestion.retry.max_retries, 5);

        let storage = settings.storage_config();
        assert_eq!(storage.max_batch_size, 100);
        assert_eq!(storage.retry.max_retries, 5);
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let err = settings(&[("DRIFTLOG_MAX_BATCH_SIZE", "lots")]).unwrap_err();

        assert!(err.to_string().contains("DRIFTLOG_MAX_BATCH_SIZE"));
    }

    #[test]
    fn test_out_of_range_skew_rejected() {
        let err = settings(&[("DRIFTLOG_MAX_FUTURE_SKEW_SECS", "9000000000000")]).unwrap_err();
        assert!(err.to_string().contains("DRIFTLOG_MAX_FUTURE_SKEW_SECS"));

        let settings = settings(&[("DRIFTLOG_MAX_FUTURE_SKEW_SECS", "31536000")]).unwrap();
        assert_eq!(settings.rules.max_future_skew, Duration::from_secs(31_536_000));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(settings(&[("DRIFTLOG_TOPIC_PREFIX", "")]).is_err());
    }
}
