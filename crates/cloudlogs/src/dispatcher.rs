// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered delivery of batches to a log stream.
//!
//! The dispatcher owns the stream's sequence token. Each append presents the
//! token returned by the previous successful append; a token conflict is
//! resolved once by adopting the token embedded in the rejection and
//! retrying. Every other failure is returned to the caller as fatal.
//!
//! ```text
//!   Batch ──> AppendEvents ──> PutLogEvents(token)
//!                                 │
//!                 ┌───────────────┼──────────────────────┐
//!                 v               v                      v
//!              success    InvalidSequenceToken      other error
//!            store token   extract, retry once        fatal
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::batcher::Batch;
use crate::errors::{CreateError, DispatchError, PutLogEventsError};
use crate::log_stream::{LogStreamClient, StreamIdentity};
use crate::record::{to_append_events, AppendEvent};
use crate::sequence_token::extract_expected_token;

/// Successful result of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The batch was appended on the first attempt.
    Appended,
    /// The first attempt hit a token conflict; the retry succeeded.
    AppendedAfterResync,
}

/// Receiver of completed batches.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Delivers `batch` in order. An error means the batch was not delivered
    /// and must be treated as fatal.
    async fn dispatch(&self, batch: Batch) -> Result<DispatchOutcome, DispatchError>;
}

pub struct Dispatcher<C> {
    client: Arc<C>,
    target: StreamIdentity,
    // Held across the whole append so concurrent dispatches stay ordered
    sequence_token: Mutex<Option<String>>,
}

impl<C: LogStreamClient> Dispatcher<C> {
    pub fn new(client: Arc<C>, target: StreamIdentity) -> Self {
        Dispatcher {
            client,
            target,
            sequence_token: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &StreamIdentity {
        &self.target
    }

    /// Token that will be attached to the next append.
    pub async fn sequence_token(&self) -> Option<String> {
        self.sequence_token.lock().await.clone()
    }

    /// Ensures the log group and log stream exist.
    ///
    /// Existing resources are fine; any other creation failure is returned.
    pub async fn initialize(&self) -> Result<(), DispatchError> {
        let group = &self.target.group;
        let stream = &self.target.stream;

        tolerate_existing("group", group, self.client.create_log_group(group).await)?;
        tolerate_existing("stream", stream, self.client.create_log_stream(group, stream).await)?;

        debug!("Log stream {} ready", self.target);
        Ok(())
    }

    async fn append(
        &self,
        events: &[AppendEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, PutLogEventsError> {
        self.client
            .put_log_events(&self.target, events, sequence_token)
            .await
            .map(|output| output.next_sequence_token)
    }
}

fn tolerate_existing(
    kind: &'static str,
    name: &str,
    result: Result<(), CreateError>,
) -> Result<(), DispatchError> {
    match result {
        Ok(()) => Ok(()),
        Err(CreateError::AlreadyExists(message)) => {
            warn!("cloudwatch log {kind} '{name}' already exists: {message}");
            Ok(())
        }
        Err(source) => Err(DispatchError::Setup {
            kind,
            name: name.to_string(),
            source,
        }),
    }
}

#[async_trait]
impl<C: LogStreamClient> Dispatch for Dispatcher<C> {
    async fn dispatch(&self, batch: Batch) -> Result<DispatchOutcome, DispatchError> {
        let events = to_append_events(batch.records());
        debug!(
            "Dispatching {} events ({} bytes) to {}",
            events.len(),
            batch.cumulative_size(),
            self.target
        );

        let mut sequence_token = self.sequence_token.lock().await;

        match self.append(&events, sequence_token.as_deref()).await {
            Ok(next) => {
                *sequence_token = next;
                debug!("Sequence token updated: {:?}", *sequence_token);
                Ok(DispatchOutcome::Appended)
            }
            Err(PutLogEventsError::InvalidSequenceToken { message }) => {
                warn!("Retry sending due to sequence resume: {message}");
                *sequence_token = extract_expected_token(&message)?;

                let next = self
                    .append(&events, sequence_token.as_deref())
                    .await
                    .map_err(|source| DispatchError::Retry {
                        events: events.len(),
                        source,
                    })?;
                *sequence_token = next;
                debug!("Sequence token updated after resync: {:?}", *sequence_token);
                Ok(DispatchOutcome::AppendedAfterResync)
            }
            Err(source) => Err(DispatchError::Append {
                events: events.len(),
                source,
            }),
        }
    }
}
