// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays log records into an append-only, strictly ordered CloudWatch Logs
//! stream.
//!
//! Records arrive through a bounded channel, are grouped by the [`batcher`]
//! under a byte capacity and a maximum latency, and each completed batch is
//! appended by the [`dispatcher`], which owns the stream's sequence token.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod cloudwatch;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod log_stream;
pub mod record;
pub mod sequence_token;
pub mod source;
