// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Default batch capacity in bytes of message payload.
///
/// Only message bytes are counted. PutLogEvents also charges 26 bytes per
/// event against its 1,048,576 byte limit and accepts at most 10,000 events,
/// so a batch of many short messages can still be refused.
pub const DEFAULT_BATCH_SIZE: usize = 900_000;

/// Default maximum time a record may wait before a flush is forced.
pub const DEFAULT_BATCH_DURATION: Duration = Duration::from_millis(250);

/// Capacity of the channel between the record source and the batcher.
///
/// Kept small so the source feels backpressure while a flush is in flight.
pub const HANDOFF_CHANNEL_CAPACITY: usize = 1;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw field holding the message body of a decoded record.
pub const CONTENT_FIELD: &str = "content";
/// Raw field holding the timestamp of a decoded record.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Raw field holding the peer address the record was received from.
pub const CLIENT_FIELD: &str = "client";
