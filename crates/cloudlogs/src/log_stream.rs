// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contract of the remote append service.

use async_trait::async_trait;

use crate::errors::{CreateError, PutLogEventsError};
use crate::record::AppendEvent;

/// Log group and stream a dispatcher appends to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub group: String,
    pub stream: String,
}

impl StreamIdentity {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        StreamIdentity {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutLogEventsOutput {
    /// Token to present on the next append, when the service issues one.
    pub next_sequence_token: Option<String>,
}

/// Idempotent-create, strictly ordered append API.
#[async_trait]
pub trait LogStreamClient: Send + Sync {
    async fn create_log_group(&self, group: &str) -> Result<(), CreateError>;

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), CreateError>;

    /// Appends `events` in order. `sequence_token` must be the token returned
    /// by the previous successful append, if any.
    async fn put_log_events(
        &self,
        target: &StreamIdentity,
        events: &[AppendEvent],
        sequence_token: Option<&str>,
    ) -> Result<PutLogEventsOutput, PutLogEventsError>;
}
