//! Configuration management for the todo service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file, if present, is read first by the binary.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        reason: String,
    },

    /// A variable required by another setting is missing.
    #[error("{key} is required when {because}")]
    Missing {
        /// Environment variable name
        key: &'static str,
        /// Setting that requires it
        because: &'static str,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Event bus settings
    pub broker: BrokerConfig,
    /// Record store settings
    pub store: StoreConfig,
    /// Logging and metrics settings
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Upper bound on waiting for the consumer during shutdown
    pub shutdown_timeout: Duration,
}

/// Which [`EventBus`](todo_events_core::EventBus) to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// Kafka-compatible brokers
    Kafka,
    /// In-process bus; events do not survive a restart
    Memory,
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Bus implementation
    pub backend: BusBackend,
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic shared by the publisher and the consumer
    pub topic: String,
    /// Consumer group
    pub consumer_group: String,
    /// Where a new consumer group starts reading
    pub auto_offset_reset: String,
    /// Producer acknowledgment mode
    pub producer_acks: String,
    /// Producer send timeout
    pub producer_timeout: Duration,
    /// Extra publish attempts on transient broker failures
    pub publish_retries: usize,
}

/// Record store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// In-process map; records do not survive a restart
    Memory,
    /// `PostgreSQL`
    Postgres {
        /// Connection URL
        url: String,
        /// Maximum pool size
        max_connections: u32,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Port of the Prometheus scrape endpoint; disabled when unset
    pub metrics_port: Option<u16>,
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres { .. } => f.write_str("postgres"),
        }
    }
}

#[derive(Clone, Copy)]
enum StoreKind {
    Memory,
    Postgres,
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn choice<T: Copy>(
        &self,
        key: &'static str,
        default: T,
        options: &[(&str, T)],
    ) -> Result<T, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        options
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value.trim()))
            .map(|(_, choice)| *choice)
            .ok_or_else(|| ConfigError::Invalid {
                key,
                reason: format!(
                    "expected one of {}",
                    options.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
                ),
                value,
            })
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value, or
    /// `STORE_BACKEND=postgres` is set without `DATABASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let server = ServerConfig {
            host: vars.string("HOST", "0.0.0.0"),
            port: vars.parsed("PORT", 3000)?,
            shutdown_timeout: Duration::from_secs(vars.parsed("SHUTDOWN_TIMEOUT_SECS", 10)?),
        };

        let broker = BrokerConfig {
            backend: vars.choice(
                "EVENT_BUS",
                BusBackend::Kafka,
                &[("kafka", BusBackend::Kafka), ("memory", BusBackend::Memory)],
            )?,
            brokers: vars.string("BROKERS", "localhost:9092"),
            topic: vars.string("TOPIC", todo_events_core::DEFAULT_TOPIC),
            consumer_group: vars.string("CONSUMER_GROUP", "todo-group"),
            auto_offset_reset: vars.string("AUTO_OFFSET_RESET", "earliest"),
            producer_acks: vars.string("PRODUCER_ACKS", "all"),
            producer_timeout: Duration::from_millis(vars.parsed("PRODUCER_TIMEOUT_MS", 5000)?),
            publish_retries: vars.parsed("PUBLISH_RETRIES", 0)?,
        };

        let store = match vars.choice(
            "STORE_BACKEND",
            StoreKind::Memory,
            &[("memory", StoreKind::Memory), ("postgres", StoreKind::Postgres)],
        )? {
            StoreKind::Memory => StoreConfig::Memory,
            StoreKind::Postgres => StoreConfig::Postgres {
                url: vars.get("DATABASE_URL").ok_or(ConfigError::Missing {
                    key: "DATABASE_URL",
                    because: "STORE_BACKEND=postgres",
                })?,
                max_connections: vars.parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            },
        };

        let telemetry = TelemetryConfig {
            log_format: vars.choice(
                "LOG_FORMAT",
                LogFormat::Pretty,
                &[("pretty", LogFormat::Pretty), ("json", LogFormat::Json)],
            )?,
            metrics_port: match vars.get("METRICS_PORT") {
                None => None,
                Some(_) => Some(vars.parsed("METRICS_PORT", 0)?),
            },
        };

        Ok(Self {
            server,
            broker,
            store,
            telemetry,
        })
    }

    /// `host:port` the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
