//! Process settings read from the environment

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::task_queue::broker::QueueTopology;
use crate::task_queue::consumer::ConsumerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Service settings
///
/// | Variable | Default |
/// |---|---|
/// | `DATABASE_URL` | unset: in-memory broker |
/// | `REDIS_URL` | unset: in-memory cache |
/// | `QUEUE_NAME` | `llm_requests` |
/// | `DEAD_LETTER_QUEUE` | `llm_dead_letter` |
/// | `MAX_RETRIES` | 3 |
/// | `RETRY_DELAY_SECONDS` | 5 |
/// | `DELAY_RETRIES` | false |
/// | `PREFETCH_COUNT` | 10 |
/// | `CACHE_TTL_SECONDS` | 3600 |
/// | `SHUTDOWN_TIMEOUT_SECONDS` | 30 |
/// | `BIND_ADDR` | `127.0.0.1:3030` |
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub queue_name: String,
    pub dead_letter_queue: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Apply `retry_delay` to retries; otherwise they are immediate
    pub delay_retries: bool,
    pub prefetch_count: usize,
    pub cache_ttl: Duration,
    pub shutdown_timeout: Duration,
    pub bind_addr: SocketAddr,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source
    ///
    /// # Example
    ///
    /// ```
    /// use chatq::config::Settings;
    ///
    /// let settings = Settings::from_lookup(|name| match name {
    ///     "DATABASE_URL" => Some("postgres://postgres:pw@localhost/chat".to_string()),
    ///     "PREFETCH_COUNT" => Some("4".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(settings.prefetch_count, 4);
    /// assert_eq!(settings.queue_name, "llm_requests");
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            queue_name: lookup("QUEUE_NAME").unwrap_or_else(|| "llm_requests".to_string()),
            dead_letter_queue: lookup("DEAD_LETTER_QUEUE")
                .unwrap_or_else(|| "llm_dead_letter".to_string()),
            max_retries: parse(&lookup, "MAX_RETRIES", 3)?,
            retry_delay: Duration::from_secs(parse(&lookup, "RETRY_DELAY_SECONDS", 5)?),
            delay_retries: parse_bool(&lookup, "DELAY_RETRIES", false)?,
            prefetch_count: positive(&lookup, "PREFETCH_COUNT", 10)?,
            cache_ttl: Duration::from_secs(positive(&lookup, "CACHE_TTL_SECONDS", 3600)?),
            shutdown_timeout: Duration::from_secs(parse(&lookup, "SHUTDOWN_TIMEOUT_SECONDS", 30)?),
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3030)))?,
        })
    }

    pub fn topology(&self) -> QueueTopology {
        QueueTopology::new(self.queue_name.clone(), self.dead_letter_queue.clone())
    }

    /// Consumer configuration for the main queue
    pub fn consumer_config(&self, consumer_tag: impl Into<String>) -> ConsumerConfig {
        ConsumerConfig::new(self.queue_name.clone(), consumer_tag)
            .with_max_retries(self.max_retries)
            .with_prefetch(self.prefetch_count)
            .with_retry_delay(self.retry_delay)
            .with_delayed_retries(self.delay_retries)
            .with_shutdown_timeout(self.shutdown_timeout)
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let value = parse(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
        None => Ok(default),
    }
}
