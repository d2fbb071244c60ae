// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration Surface
//!
//! This module provides the pipeline's configuration: the broker endpoint,
//! the live and quarantine destinations, and the concurrency limits. The
//! struct deserializes from any serde source and can also be loaded from
//! `REDRIVE_*` environment variables.

use crate::{
    drain::DrainOptions,
    errors::RedriveError,
};
use serde::Deserialize;
use std::{env, time::Duration};

/// A live destination: a plain queue, or a topic+subscription pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DestinationName {
    Subscription { topic: String, subscription: String },
    Queue { queue: String },
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Opaque, already-formed broker endpoint URI
    pub endpoint: String,
    /// The live destination messages are produced to and replayed into
    pub live: DestinationName,
    /// Queue receiving terminally failed messages
    pub quarantine: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    /// Upper bound, in milliseconds, on the wait for one batch
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Delivery attempts budgeted to transient failures before the broker's
    /// delivery-limit policy takes over
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: u32,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_prefetch() -> usize {
    10
}

fn default_max_wait_ms() -> u64 {
    2_000
}

fn default_retry_threshold() -> u32 {
    crate::classifier::DEFAULT_RETRY_THRESHOLD
}

impl Config {
    /// Loads the configuration from `REDRIVE_*` environment variables.
    ///
    /// `REDRIVE_TOPIC`/`REDRIVE_SUBSCRIPTION` select a topic+subscription
    /// live destination; otherwise `REDRIVE_QUEUE` selects a plain queue.
    pub fn from_env() -> Result<Config, RedriveError> {
        let endpoint = require("REDRIVE_ENDPOINT")?;

        let live = match env::var("REDRIVE_TOPIC") {
            Ok(topic) => DestinationName::Subscription {
                topic,
                subscription: require("REDRIVE_SUBSCRIPTION")?,
            },
            Err(_) => DestinationName::Queue {
                queue: require("REDRIVE_QUEUE")?,
            },
        };

        Ok(Config {
            endpoint,
            live,
            quarantine: require("REDRIVE_QUARANTINE_QUEUE")?,
            max_concurrent: numeric("REDRIVE_MAX_CONCURRENT", default_max_concurrent())?,
            prefetch: numeric("REDRIVE_PREFETCH", default_prefetch())?,
            max_wait_ms: numeric("REDRIVE_MAX_WAIT_MS", default_max_wait_ms())?,
            retry_threshold: numeric("REDRIVE_RETRY_THRESHOLD", default_retry_threshold())?,
        })
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl From<&Config> for DrainOptions {
    fn from(cfg: &Config) -> DrainOptions {
        DrainOptions {
            prefetch: cfg.prefetch,
            max_concurrent: cfg.max_concurrent,
            max_wait: cfg.max_wait(),
        }
    }
}

fn require(key: &str) -> Result<String, RedriveError> {
    env::var(key).map_err(|_| RedriveError::ConfigError(key.to_owned()))
}

fn numeric<T: std::str::FromStr>(key: &str, default: T) -> Result<T, RedriveError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RedriveError::ConfigError(key.to_owned())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_queue_destination_with_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "endpoint": "amqp://localhost:5672/%2f",
                "live": { "queue": "orders" },
                "quarantine": "orders-quarantine"
            }"#,
        )
        .unwrap();

        assert_eq!(
            cfg.live,
            DestinationName::Queue {
                queue: "orders".to_owned()
            }
        );
        assert_eq!(cfg.max_concurrent, 4);
        assert_eq!(cfg.prefetch, 10);
        assert_eq!(cfg.max_wait(), Duration::from_millis(2_000));
        assert_eq!(cfg.retry_threshold, 3);
    }

    #[test]
    fn deserializes_topic_subscription_destination() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "endpoint": "amqp://localhost:5672/%2f",
                "live": { "topic": "orders", "subscription": "billing" },
                "quarantine": "orders-quarantine",
                "max_concurrent": 8
            }"#,
        )
        .unwrap();

        assert_eq!(
            cfg.live,
            DestinationName::Subscription {
                topic: "orders".to_owned(),
                subscription: "billing".to_owned()
            }
        );
        assert_eq!(cfg.max_concurrent, 8);
    }
}
