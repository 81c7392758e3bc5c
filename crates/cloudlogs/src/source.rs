// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP line source feeding the batcher.
//!
//! Every datagram is split on newlines and each non-empty line becomes one
//! [`LogRecord`]. Records are handed over with `send().await`, so a full
//! handoff channel blocks the reader while a flush is in flight.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::constants::{CLIENT_FIELD, CONTENT_FIELD, TIMESTAMP_FIELD};
use crate::record::LogRecord;

// Largest UDP payload
const BUFFER_SIZE: usize = 65_535;

// Delay before the next read after a receive error
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

enum BufferReader {
    UdpSocket(UdpSocket),

    /// Mirror reader for testing - replays a fixed buffer
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),

    /// Failing reader for testing - every read returns the given error kind
    #[allow(dead_code)]
    FailingTest(std::io::ErrorKind, SocketAddr),
}

impl BufferReader {
    async fn read(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => {
                let mut buf = vec![0; BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                buf.truncate(amt);
                Ok((buf, src))
            }
            BufferReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
            BufferReader::FailingTest(kind, _) => Err((*kind).into()),
        }
    }
}

pub struct UdpLineSource {
    cancel_token: CancellationToken,
    records_tx: Sender<LogRecord>,
    buffer_reader: BufferReader,
}

impl UdpLineSource {
    /// Binds `0.0.0.0:<port>`.
    pub async fn bind(
        port: u16,
        records_tx: Sender<LogRecord>,
        cancel_token: CancellationToken,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        debug!("UDP source listening on {}", socket.local_addr()?);
        Ok(UdpLineSource {
            cancel_token,
            records_tx,
            buffer_reader: BufferReader::UdpSocket(socket),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.buffer_reader {
            BufferReader::UdpSocket(socket) => socket.local_addr(),
            BufferReader::MirrorTest(_, src) | BufferReader::FailingTest(_, src) => Ok(*src),
        }
    }

    /// Reads until cancelled or until the batcher drops its receiver.
    pub async fn spin(self) {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("UDP source cancelled");
                    break;
                }
                open = self.consume() => {
                    if !open {
                        debug!("Record channel closed, stopping UDP source");
                        break;
                    }
                }
            }
        }
    }

    /// Receives one datagram and forwards its lines. Returns false once the
    /// receiving side is gone.
    async fn consume(&self) -> bool {
        let (buf, src) = match self.buffer_reader.read().await {
            Ok(read) => read,
            Err(e) => {
                error!("Failed to receive datagram: {}", e);
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                return true;
            }
        };

        let received_at = Utc::now();
        let payload = String::from_utf8_lossy(&buf);
        trace!("Received datagram from {}: {}", src, payload);

        for line in payload.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let fields = HashMap::from([
                (CONTENT_FIELD.to_string(), Value::from(line)),
                (
                    TIMESTAMP_FIELD.to_string(),
                    Value::from(received_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ),
                (CLIENT_FIELD.to_string(), Value::from(src.to_string())),
            ]);
            if self
                .records_tx
                .send(LogRecord::from_fields(fields, received_at))
                .await
                .is_err()
            {
                return false;
            }
        }
        true
    }
}
