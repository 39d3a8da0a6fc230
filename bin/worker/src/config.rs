//! Centralized worker configuration.
//!
//! This module provides strongly-typed configuration for the worker,
//! loaded via the `config` crate from environment variables.

use serde::Deserialize;

/// Worker configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// NATS connection settings.
    #[serde(default)]
    pub nats: NatsSettings,

    /// HTTP API settings.
    #[serde(default)]
    pub http: HttpSettings,

    /// Batch sweep settings.
    #[serde(default)]
    pub batch: BatchSettings,
}

/// NATS connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Override for the step stream name.
    #[serde(default)]
    pub step_stream: Option<String>,

    /// Override for the trigger stream name.
    #[serde(default)]
    pub trigger_stream: Option<String>,

    /// Override for the trigger consumer's durable name.
    #[serde(default)]
    pub trigger_consumer: Option<String>,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            step_stream: None,
            trigger_stream: None,
            trigger_consumer: None,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    /// Address the API listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_owned()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Batch sweep settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    /// Seconds between batch sweeps.
    /// One minute keeps cron matching aligned with minute granularity.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Maximum trigger messages pulled per consumer batch.
    #[serde(default = "default_trigger_batch_size")]
    pub trigger_batch_size: usize,

    /// Milliseconds the consumer idles after an empty fetch.
    #[serde(default = "default_trigger_idle_wait_ms")]
    pub trigger_idle_wait_ms: u64,
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_trigger_batch_size() -> usize {
    100
}

fn default_trigger_idle_wait_ms() -> u64 {
    500
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            trigger_batch_size: default_trigger_batch_size(),
            trigger_idle_wait_ms: default_trigger_idle_wait_ms(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
