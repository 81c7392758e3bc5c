// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{TimeZone, Utc};
use cloudlogs::{
    batcher::{Batcher, BatcherConfig},
    cloudwatch::{credentials::Credentials, provider::CredentialsProvider, CloudWatchLogsClient},
    dispatcher::Dispatcher,
    errors::{DispatchError, PutLogEventsError},
    http::get_client,
    log_stream::StreamIdentity,
    record::LogRecord,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{timeout, Duration},
};

const PUT_TARGET: &str = "Logs_20140328.PutLogEvents";

fn dispatcher_for(server: &ServerGuard) -> Arc<Dispatcher<CloudWatchLogsClient>> {
    let client = CloudWatchLogsClient::new(
        get_client(Duration::from_secs(5), None),
        CredentialsProvider::from_static(Credentials::new("AKIDTEST", "secret", Some("session"))),
        "us-east-1",
        Some(&server.url()),
    )
    .expect("failed to create client");
    Arc::new(Dispatcher::new(
        Arc::new(client),
        StreamIdentity::new("app", "web-1"),
    ))
}

fn record(message: &str, millis: i64) -> LogRecord {
    LogRecord::new(
        message,
        Utc.timestamp_millis_opt(millis)
            .single()
            .expect("valid timestamp"),
    )
}

fn service_error(code: &str, message: &str) -> String {
    json!({
        "__type": format!("com.amazonaws.logs#{code}"),
        "message": message,
    })
    .to_string()
}

fn put_body(message: &str, millis: i64, token: Option<&str>) -> Matcher {
    let mut body = json!({
        "logGroupName": "app",
        "logStreamName": "web-1",
        "logEvents": [{"timestamp": millis, "message": message}],
    });
    if let Some(token) = token {
        body["sequenceToken"] = json!(token);
    }
    Matcher::Json(body)
}

/// Sends `records` one per batch through a running batcher and waits for it
/// to stop.
async fn relay(
    dispatcher: Arc<Dispatcher<CloudWatchLogsClient>>,
    records: Vec<LogRecord>,
) -> Result<(), DispatchError> {
    let config = BatcherConfig {
        capacity_bytes: 1,
        max_latency: Duration::from_secs(60),
    };
    let (tx, rx) = mpsc::channel(1);
    let batcher = tokio::spawn(Batcher::new(config, dispatcher).run(rx));

    for record in records {
        if tx.send(record).await.is_err() {
            break;
        }
    }
    drop(tx);

    timeout(Duration::from_secs(10), batcher)
        .await
        .expect("batcher did not stop")
        .expect("batcher task panicked")
}

#[tokio::test]
async fn stream_setup_tolerates_existing_resources() {
    let mut server = Server::new_async().await;
    let group = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
        .match_header("x-amz-security-token", "session")
        .with_status(400)
        .with_body(service_error(
            "ResourceAlreadyExistsException",
            "The specified log group already exists",
        ))
        .create_async()
        .await;
    let stream = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
        .with_status(200)
        .create_async()
        .await;

    dispatcher_for(&server)
        .initialize()
        .await
        .expect("initialize should tolerate an existing group");

    group.assert_async().await;
    stream.assert_async().await;
}

#[tokio::test]
async fn stream_setup_fails_on_access_denied() {
    let mut server = Server::new_async().await;
    let _group = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
        .with_status(400)
        .with_body(service_error("AccessDeniedException", "not authorized"))
        .create_async()
        .await;
    let stream = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let err = dispatcher_for(&server).initialize().await.unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Setup { kind: "group", .. }
    ));
    stream.assert_async().await;
}

#[tokio::test]
async fn relay_resyncs_sequence_token_and_keeps_order() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .match_body(put_body("first", 1_000, None))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken":"token-1"}"#)
        .create_async()
        .await;
    let conflict = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .match_body(put_body("second", 2_000, Some("token-1")))
        .with_status(400)
        .with_body(service_error(
            "InvalidSequenceTokenException",
            "The given sequenceToken is invalid. The next expected sequenceToken is: token-9",
        ))
        .create_async()
        .await;
    let retry = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .match_body(put_body("second", 2_000, Some("token-9")))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken":"token-10"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    relay(
        Arc::clone(&dispatcher),
        vec![record("first", 1_000), record("second", 2_000)],
    )
    .await
    .expect("relay should recover from a token conflict");

    first.assert_async().await;
    conflict.assert_async().await;
    retry.assert_async().await;
    assert_eq!(
        dispatcher.sequence_token().await,
        Some("token-10".to_string())
    );
}

#[tokio::test]
async fn relay_stops_when_retry_fails() {
    let mut server = Server::new_async().await;
    let conflict = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .match_body(put_body("first", 1_000, None))
        .with_status(400)
        .with_body(service_error(
            "InvalidSequenceTokenException",
            "The given sequenceToken is invalid. The next expected sequenceToken is: token-9",
        ))
        .create_async()
        .await;
    let retry = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .match_body(put_body("first", 1_000, Some("token-9")))
        .with_status(400)
        .with_body(service_error(
            "InvalidSequenceTokenException",
            "The given sequenceToken is invalid. The next expected sequenceToken is: token-12",
        ))
        .create_async()
        .await;

    let err = relay(
        dispatcher_for(&server),
        vec![record("first", 1_000), record("second", 2_000)],
    )
    .await
    .unwrap_err();

    match err {
        DispatchError::Retry { events, source } => {
            assert_eq!(events, 1);
            assert!(matches!(
                source,
                PutLogEventsError::InvalidSequenceToken { .. }
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    conflict.assert_async().await;
    retry.assert_async().await;
}

#[tokio::test]
async fn relay_stops_on_unrecoverable_append_error() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/")
        .match_header("x-amz-target", PUT_TARGET)
        .with_status(400)
        .with_body(service_error(
            "ResourceNotFoundException",
            "The specified log stream does not exist.",
        ))
        .expect(1)
        .create_async()
        .await;

    let err = relay(
        dispatcher_for(&server),
        vec![record("first", 1_000), record("second", 2_000)],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DispatchError::Append { events: 1, .. }));
    rejected.assert_async().await;
}
