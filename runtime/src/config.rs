//! Configuration for the ingestion service.
//!
//! Loads configuration from environment variables. Only `MAX_CONSUMERS` is
//! mandatory; the process refuses to start without a usable value.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use ticket_ingest_core::TICKETS_QUEUE;

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but its value is unusable.
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        /// The variable name.
        var: &'static str,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Ingestion service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Maximum number of messages processed concurrently.
    pub max_consumers: usize,
    /// Queue (topic) to consume tickets from.
    pub queue: String,
    /// `PostgreSQL` connection URL.
    pub database_url: String,
    /// Broker bootstrap servers (comma-separated).
    pub brokers: String,
    /// Consumer group id.
    pub consumer_group: String,
    /// Per-message processing deadline; `None` disables it.
    pub message_deadline: Option<Duration>,
    /// Connection attempts at startup before giving up.
    pub startup_max_retries: usize,
    /// Prometheus listener address, if metrics should be exported.
    pub metrics_addr: Option<SocketAddr>,
}

impl IngestConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `MAX_CONSUMERS` is absent, not a number or
    /// zero, if no database location is configured, or if an optional value
    /// is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_consumers = lookup("MAX_CONSUMERS").ok_or(ConfigError::Missing("MAX_CONSUMERS"))?;
        let max_consumers = match max_consumers.trim().parse::<usize>() {
            Ok(0) => {
                return Err(ConfigError::Invalid {
                    var: "MAX_CONSUMERS",
                    value: max_consumers,
                    reason: "must be at least 1",
                });
            }
            Ok(n) => n,
            Err(_) => {
                return Err(ConfigError::Invalid {
                    var: "MAX_CONSUMERS",
                    value: max_consumers,
                    reason: "not a number",
                });
            }
        };

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => database_url_from_parts(&lookup)?,
        };

        let deadline_secs: u64 = parse_or("MESSAGE_DEADLINE_SECS", &lookup, 30)?;

        let metrics_addr = lookup("METRICS_ADDR")
            .map(|value| {
                value.parse::<SocketAddr>().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_ADDR",
                    value,
                    reason: "not a socket address",
                })
            })
            .transpose()?;

        Ok(Self {
            max_consumers,
            queue: lookup("TICKET_QUEUE").unwrap_or_else(|| TICKETS_QUEUE.to_string()),
            database_url,
            brokers: lookup("REDPANDA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or_else(|| "ticket-ingest".to_string()),
            message_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            startup_max_retries: parse_or("STARTUP_MAX_RETRIES", &lookup, 5)?,
            metrics_addr,
        })
    }
}

fn database_url_from_parts<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("DB_HOST").ok_or(ConfigError::Missing("DATABASE_URL"))?;
    let port = lookup("DB_PORT").unwrap_or_else(|| "5432".to_string());
    let name = lookup("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?;
    let user = lookup("DB_USER").ok_or(ConfigError::Missing("DB_USER"))?;
    let password = lookup("DB_PASSWORD").unwrap_or_default();

    Ok(format!(
        "postgres://{}:{}@{host}:{port}/{}?sslmode=disable",
        urlencoding::encode(&user),
        urlencoding::encode(&password),
        urlencoding::encode(&name),
    ))
}

fn parse_or<T, F>(var: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            reason: "not a number",
        }),
    }
}
