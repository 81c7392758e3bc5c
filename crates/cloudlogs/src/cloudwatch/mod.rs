// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs client speaking the AWS JSON 1.1 protocol.
//!
//! ```text
//!   Dispatcher
//!       │
//!       v
//!   ┌─────────────┐
//!   │ JSON body   │ (camelCase, serde)
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │ SigV4 sign  │ (service "logs")
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │ HTTP POST / │ (X-Amz-Target: Logs_20140328.<Op>)
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │ map __type  │ -> CreateError / PutLogEventsError
//!   └─────────────┘
//! ```

pub mod credentials;
pub mod provider;
pub mod signing;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ConfigError, CreateError, PutLogEventsError};
use crate::log_stream::{LogStreamClient, PutLogEventsOutput, StreamIdentity};
use crate::record::AppendEvent;
use provider::CredentialsProvider;
use signing::RequestSigner;

const SERVICE: &str = "logs";
const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";

const RESOURCE_ALREADY_EXISTS: &str = "ResourceAlreadyExistsException";
const INVALID_SEQUENCE_TOKEN: &str = "InvalidSequenceTokenException";

/// Regional CloudWatch Logs endpoint.
#[must_use]
pub fn region_endpoint(region: &str) -> String {
    format!("https://logs.{region}.amazonaws.com")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [AppendEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<i64>,
    too_old_log_event_end_index: Option<i64>,
    expired_log_event_end_index: Option<i64>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// A request that reached the service and was refused.
#[derive(Debug)]
struct ServiceFailure {
    status: StatusCode,
    code: String,
    message: String,
}

enum CallError {
    Credentials(String),
    Transport(String),
    Service(ServiceFailure),
}

impl From<CallError> for CreateError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Credentials(e) => CreateError::Credentials(e),
            CallError::Transport(e) => CreateError::Transport(e),
            CallError::Service(f) if f.code == RESOURCE_ALREADY_EXISTS => {
                CreateError::AlreadyExists(f.message)
            }
            CallError::Service(f) => CreateError::Service {
                status: f.status,
                code: f.code,
                message: f.message,
            },
        }
    }
}

impl From<CallError> for PutLogEventsError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Credentials(e) => PutLogEventsError::Credentials(e),
            CallError::Transport(e) => PutLogEventsError::Transport(e),
            CallError::Service(f) if f.code == INVALID_SEQUENCE_TOKEN => {
                PutLogEventsError::InvalidSequenceToken { message: f.message }
            }
            CallError::Service(f) => PutLogEventsError::Service {
                status: f.status,
                code: f.code,
                message: f.message,
            },
        }
    }
}

pub struct CloudWatchLogsClient {
    client: reqwest::Client,
    url: Url,
    host: String,
    credentials: CredentialsProvider,
    signer: RequestSigner,
}

impl CloudWatchLogsClient {
    /// Builds a client for `region`, posting to `endpoint` when given and to
    /// the regional endpoint otherwise.
    pub fn new(
        client: reqwest::Client,
        credentials: CredentialsProvider,
        region: &str,
        endpoint: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let endpoint = endpoint.map_or_else(|| region_endpoint(region), str::to_string);
        let url = Url::parse(&endpoint)
            .map_err(|e| ConfigError::Invalid(format!("endpoint '{endpoint}': {e}")))?;
        let Some(host) = url.host_str() else {
            return Err(ConfigError::Invalid(format!(
                "endpoint '{endpoint}' has no host"
            )));
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(CloudWatchLogsClient {
            client,
            host,
            url,
            credentials,
            signer: RequestSigner::new(region, SERVICE),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn call(&self, operation: &str, body: Vec<u8>) -> Result<Vec<u8>, CallError> {
        let target = format!("{TARGET_PREFIX}.{operation}");
        let credentials = self
            .credentials
            .credentials()
            .await
            .map_err(|e| CallError::Credentials(e.to_string()))?;
        let signed = self.signer.sign(
            &credentials,
            &self.host,
            &[("Content-Type", CONTENT_TYPE), ("X-Amz-Target", &target)],
            &body,
            Utc::now(),
        );

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", &target)
            .header("X-Amz-Date", signed.amz_date)
            .header("Authorization", signed.authorization);
        if let Some(token) = signed.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let resp = request
            .body(body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let failure = parse_failure(status, &headers, &bytes);
        debug!(
            "CLOUDWATCH | {} failed with {} ({}): {}",
            operation, failure.code, status, failure.message
        );
        Err(CallError::Service(failure))
    }
}

#[async_trait]
impl LogStreamClient for CloudWatchLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), CreateError> {
        let body = serde_json::to_vec(&CreateLogGroupRequest {
            log_group_name: group,
        })
        .map_err(|e| CreateError::Transport(e.to_string()))?;
        self.call("CreateLogGroup", body).await?;
        Ok(())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), CreateError> {
        let body = serde_json::to_vec(&CreateLogStreamRequest {
            log_group_name: group,
            log_stream_name: stream,
        })
        .map_err(|e| CreateError::Transport(e.to_string()))?;
        self.call("CreateLogStream", body).await?;
        Ok(())
    }

    async fn put_log_events(
        &self,
        target: &StreamIdentity,
        events: &[AppendEvent],
        sequence_token: Option<&str>,
    ) -> Result<PutLogEventsOutput, PutLogEventsError> {
        let body = serde_json::to_vec(&PutLogEventsRequest {
            log_group_name: &target.group,
            log_stream_name: &target.stream,
            log_events: events,
            sequence_token,
        })
        .map_err(|e| PutLogEventsError::Payload(e.to_string()))?;

        let bytes = self.call("PutLogEvents", body).await?;
        // The events were accepted; an unreadable body only loses the next token
        let response: PutLogEventsResponse = if bytes.is_empty() {
            PutLogEventsResponse::default()
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(
                    "CLOUDWATCH | {} accepted events but the response could not be parsed: {}",
                    target, e
                );
                PutLogEventsResponse::default()
            })
        };

        if let Some(rejected) = response.rejected_log_events_info {
            warn!(
                "CLOUDWATCH | {} rejected events: too new from {:?}, too old until {:?}, expired until {:?}",
                target,
                rejected.too_new_log_event_start_index,
                rejected.too_old_log_event_end_index,
                rejected.expired_log_event_end_index
            );
        }

        Ok(PutLogEventsOutput {
            next_sequence_token: response.next_sequence_token,
        })
    }
}

fn parse_failure(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ServiceFailure {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();

    // x-amzn-ErrorType may carry a ":<docs url>" suffix
    let raw_type = parsed.error_type.or_else(|| {
        headers
            .get(ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string())
    });
    let code = match raw_type {
        Some(t) => error_code(&t).to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("UnknownError")
            .to_string(),
    };
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    ServiceFailure {
        status,
        code,
        message,
    }
}

/// Strips the namespace from a `__type` value such as
/// `com.amazonaws.logs#InvalidSequenceTokenException`.
fn error_code(raw: &str) -> &str {
    raw.rsplit('#').next().unwrap_or(raw)
}
