// Runtime configuration read from the process environment (and `.env`).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Postgres URL. `None` selects the in-memory repository.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub live: LiveConfig,
    pub log_filter: String,
}

/// Tuning for the live-update path.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub send_timeout: Duration,
    pub subscriber_queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    pub dispatch_idle: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            send_timeout: Duration::from_millis(5000),
            subscriber_queue_capacity: 64,
            dispatch_queue_capacity: 1024,
            dispatch_idle: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = LiveConfig::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let live = LiveConfig {
            send_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SUBSCRIBER_SEND_TIMEOUT_MS",
                defaults.send_timeout.as_millis() as u64,
            )?),
            subscriber_queue_capacity: positive(
                "SUBSCRIBER_QUEUE_CAPACITY",
                parse_or(
                    &lookup,
                    "SUBSCRIBER_QUEUE_CAPACITY",
                    defaults.subscriber_queue_capacity,
                )?,
            )?,
            dispatch_queue_capacity: positive(
                "DISPATCH_QUEUE_CAPACITY",
                parse_or(
                    &lookup,
                    "DISPATCH_QUEUE_CAPACITY",
                    defaults.dispatch_queue_capacity,
                )?,
            )?,
            dispatch_idle: Duration::from_secs(parse_or(
                &lookup,
                "DISPATCH_IDLE_SECS",
                defaults.dispatch_idle.as_secs(),
            )?),
        };

        Ok(Config {
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?,
            live,
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

// bounded channels panic on a zero capacity
fn positive(var: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        });
    }
    Ok(value)
}
