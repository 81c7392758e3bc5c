// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::batcher::BatcherConfig;
use crate::constants::{DEFAULT_BATCH_DURATION, DEFAULT_BATCH_SIZE, DEFAULT_REQUEST_TIMEOUT};
use crate::errors::ConfigError;
use crate::log_stream::StreamIdentity;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Relay configuration, read from `SYSLOG_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// UDP port the record source listens on
    pub port: u16,
    /// AWS region, falls back to the AWS environment when unset
    pub region: Option<String>,
    /// Shared credentials profile
    pub profile: Option<String>,
    pub group: String,
    pub stream: String,
    /// Batch capacity in bytes of message payload
    pub batch_size: usize,
    /// Maximum latency before a non-empty batch is flushed
    pub batch_duration: Duration,
    /// Endpoint override, e.g. a local stack
    pub endpoint: Option<String>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// HTTP request timeout
    pub timeout: Duration,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let debug = parse_bool("SYSLOG_DEBUG")?.unwrap_or(false);
        let log_level = match non_empty_var("SYSLOG_LOG_LEVEL") {
            Some(level) => level.to_lowercase(),
            None if debug => "debug".to_string(),
            None => "info".to_string(),
        };
        let log_format = match non_empty_var("SYSLOG_LOG_FORMAT") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue {
                    name: "SYSLOG_LOG_FORMAT",
                    value,
                })?,
            None => LogFormat::Text,
        };

        let port = parse_number::<u16>("SYSLOG_PORT")?.ok_or(ConfigError::Missing("SYSLOG_PORT"))?;
        let group = non_empty_var("SYSLOG_GROUP").ok_or(ConfigError::Missing("SYSLOG_GROUP"))?;
        let stream = non_empty_var("SYSLOG_STREAM").ok_or(ConfigError::Missing("SYSLOG_STREAM"))?;

        let batch_size = parse_number::<usize>("SYSLOG_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let batch_duration = parse_number::<u64>("SYSLOG_BATCH_DURATION_MS")?
            .map_or(DEFAULT_BATCH_DURATION, Duration::from_millis);
        let timeout = parse_number::<u64>("SYSLOG_TIMEOUT_SECS")?
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        let https_proxy =
            non_empty_var("SYSLOG_HTTPS_PROXY").or_else(|| non_empty_var("HTTPS_PROXY"));

        let config = Config {
            log_level,
            log_format,
            port,
            region: non_empty_var("SYSLOG_REGION"),
            profile: non_empty_var("SYSLOG_PROFILE"),
            group,
            stream,
            batch_size,
            batch_duration,
            endpoint: non_empty_var("SYSLOG_ENDPOINT"),
            https_proxy,
            timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "SYSLOG_PORT must be greater than 0".to_string(),
            ));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::Invalid("SYSLOG_GROUP cannot be empty".to_string()));
        }
        if self.stream.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "SYSLOG_STREAM cannot be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "SYSLOG_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.batch_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "SYSLOG_BATCH_DURATION_MS must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            capacity_bytes: self.batch_size,
            max_latency: self.batch_duration,
        }
    }

    #[must_use]
    pub fn target(&self) -> StreamIdentity {
        StreamIdentity::new(self.group.clone(), self.stream.clone())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    non_empty_var(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    non_empty_var(name)
        .map(|value| match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue { name, value }),
        })
        .transpose()
}
