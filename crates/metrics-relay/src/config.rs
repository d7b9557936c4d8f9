// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::num::ParseIntError;

// 3 (tech IDs, item IDs, ignored IDs) x 14 (len('"XY1234.567", ')) x 1000 + 500 (extra) = 42500
const DEFAULT_MAX_POST_SIZE: usize = 42_500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("The provided MAX_POST_SIZE '{value}' is not an int: {source}")]
    InvalidMaxPostSize {
        value: String,
        source: ParseIntError,
    },
}

/// Relay configuration, read once from the environment at startup and
/// immutable afterwards. Handlers receive it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener network kind (tcp, tcp4, tcp6)
    pub metrics_network: String,
    /// Listener bind address; `:8000` binds all interfaces
    pub metrics_address: String,
    /// Log-sink network kind (udp, tcp, or empty for the local syslog daemon)
    pub syslog_network: String,
    pub syslog_address: String,
    /// Tag prepended to every forwarded syslog line
    pub syslog_tag: String,
    /// Access-Control-Allow-Origin value set on every response
    pub cors_origin: String,
    /// Maximum accepted POST body size in bytes (exclusive)
    pub max_post_size: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Create configuration from environment variables. Every setting has a
    /// default; the only fatal condition is a MAX_POST_SIZE that does not
    /// parse as an integer.
    pub fn from_env() -> Result<Config, ConfigError> {
        let max_post_size = match env::var("MAX_POST_SIZE") {
            Ok(value) => value
                .parse::<usize>()
                .map_err(|source| ConfigError::InvalidMaxPostSize { value, source })?,
            Err(_) => DEFAULT_MAX_POST_SIZE,
        };

        Ok(Config {
            metrics_network: env_or("METRICS_NETWORK", "tcp"),
            metrics_address: env_or("METRICS_ADDRESS", ":8000"),
            syslog_network: env_or("SYSLOG_NETWORK", "udp"),
            syslog_address: env_or("SYSLOG_ADDRESS", "127.0.0.1:514"),
            syslog_tag: env_or("SYSLOG_TAG", "playbookngexport:"),
            cors_origin: env_or("CORS_ORIGIN", "*"),
            max_post_size,
        })
    }

    /// Bind address for the listener. Addresses of the `:8000` form carry no
    /// host part and bind all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.metrics_address.starts_with(':') {
            format!("0.0.0.0{}", self.metrics_address)
        } else {
            self.metrics_address.clone()
        }
    }
}
