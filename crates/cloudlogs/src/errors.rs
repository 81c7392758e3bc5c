// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while loading configuration from the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while resolving AWS credentials or region
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("No AWS credentials found in the environment or shared credentials file")]
    NotFound,

    #[error("Profile '{0}' not found in shared credentials file")]
    ProfileNotFound(String),

    #[error("Profile '{profile}' is missing {key}")]
    IncompleteProfile { profile: String, key: &'static str },

    #[error("Failed to read shared credentials file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch credentials from {provider}: {message}")]
    Fetch {
        provider: &'static str,
        message: String,
    },

    #[error("No AWS region configured")]
    NoRegion,
}

/// Failure of an idempotent log group or log stream creation
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// The resource already exists. Callers treat this as success.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("{code} ({status}): {message}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// Failure of a PutLogEvents call
#[derive(Debug, thiserror::Error)]
pub enum PutLogEventsError {
    /// The sequence token presented does not match the stream position. The
    /// message embeds the token the stream expects next.
    #[error("invalid sequence token: {message}")]
    InvalidSequenceToken { message: String },

    #[error("{code} ({status}): {message}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("failed to encode request: {0}")]
    Payload(String),
}

/// The expected token could not be recovered from a conflict message
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SequenceTokenError {
    #[error("Missing sequence in message: {0}")]
    Missing(String),

    #[error("Found {count} sequence tokens in message: {message}")]
    Ambiguous { count: usize, message: String },
}

/// Fatal outcome of a stream setup or an append
///
/// Every variant means the batch could not be delivered in order. The
/// dispatcher never terminates the process itself; callers decide.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cloudwatch log {kind} '{name}' creation failed: {source}")]
    Setup {
        kind: &'static str,
        name: String,
        #[source]
        source: CreateError,
    },

    #[error("failed to append {events} events: {source}")]
    Append {
        events: usize,
        #[source]
        source: PutLogEventsError,
    },

    #[error("unable to resynchronize sequence token: {0}")]
    Resync(#[from] SequenceTokenError),

    #[error("retry after sequence token resync failed for {events} events: {source}")]
    Retry {
        events: usize,
        #[source]
        source: PutLogEventsError,
    },
}
