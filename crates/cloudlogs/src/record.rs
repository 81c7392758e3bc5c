// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoded log records and their wire projection.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::constants::{CONTENT_FIELD, TIMESTAMP_FIELD};

/// A decoded log record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    message: String,
    timestamp: DateTime<Utc>,
    raw_fields: HashMap<String, Value>,
}

impl LogRecord {
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        LogRecord {
            message: message.into(),
            timestamp,
            raw_fields: HashMap::new(),
        }
    }

    /// Builds a record from the fields produced by a decoder.
    ///
    /// The message is read from `content` and the time from `timestamp`
    /// (RFC 3339 string or epoch milliseconds). A missing or mistyped field is
    /// logged and replaced by an empty message or `received_at`; the record
    /// is never dropped.
    pub fn from_fields(raw_fields: HashMap<String, Value>, received_at: DateTime<Utc>) -> Self {
        let message = match raw_fields.get(CONTENT_FIELD) {
            Some(Value::String(content)) => content.clone(),
            Some(other) => {
                warn!("Record field '{CONTENT_FIELD}' is not a string: {other}");
                String::new()
            }
            None => {
                warn!("Record is missing field '{CONTENT_FIELD}'");
                String::new()
            }
        };

        let timestamp = match raw_fields.get(TIMESTAMP_FIELD).map(parse_timestamp) {
            Some(Some(timestamp)) => timestamp,
            Some(None) => {
                warn!("Record field '{TIMESTAMP_FIELD}' could not be parsed, using receive time");
                received_at
            }
            None => {
                warn!("Record is missing field '{TIMESTAMP_FIELD}', using receive time");
                received_at
            }
        };

        LogRecord {
            message,
            timestamp,
            raw_fields,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Size of the message in bytes, as counted against batch capacity.
    pub fn size(&self) -> usize {
        self.message.len()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn raw_fields(&self) -> &HashMap<String, Value> {
        &self.raw_fields
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// One record as sent in a PutLogEvents request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendEvent {
    pub timestamp: i64,
    pub message: String,
}

impl From<&LogRecord> for AppendEvent {
    fn from(record: &LogRecord) -> Self {
        AppendEvent {
            timestamp: record.timestamp_millis(),
            message: record.message.clone(),
        }
    }
}

/// Projects records to append events, keeping their order.
pub fn to_append_events(records: &[LogRecord]) -> Vec<AppendEvent> {
    records.iter().map(AppendEvent::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn fields(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_from_fields() {
        let received_at = Utc.timestamp_millis_opt(1).unwrap();
        let record = LogRecord::from_fields(
            fields(&[
                ("content", json!("test123")),
                ("timestamp", json!("2018-03-05T05:23:14.250Z")),
                ("hostname", json!("web-1")),
            ]),
            received_at,
        );

        assert_eq!(record.message(), "test123");
        assert_eq!(record.size(), 7);
        assert_eq!(record.timestamp_millis(), 1_520_227_394_250);
        assert_eq!(record.raw_fields().get("hostname"), Some(&json!("web-1")));
    }

    #[test]
    fn test_from_fields_epoch_millis_timestamp() {
        let received_at = Utc.timestamp_millis_opt(1).unwrap();
        let record = LogRecord::from_fields(
            fields(&[("content", json!("x")), ("timestamp", json!(1_520_227_394_250_i64))]),
            received_at,
        );
        assert_eq!(record.timestamp_millis(), 1_520_227_394_250);
    }

    #[test]
    #[traced_test]
    fn test_from_fields_missing_content_is_forwarded_empty() {
        let received_at = Utc.timestamp_millis_opt(42).unwrap();
        let record = LogRecord::from_fields(
            fields(&[("timestamp", json!("2018-03-05T05:23:14Z"))]),
            received_at,
        );

        assert_eq!(record.message(), "");
        assert_eq!(record.size(), 0);
        assert!(logs_contain("Record is missing field 'content'"));
    }

    #[test]
    #[traced_test]
    fn test_from_fields_wrong_shapes_degrade() {
        let received_at = Utc.timestamp_millis_opt(42).unwrap();
        let record = LogRecord::from_fields(
            fields(&[("content", json!(123)), ("timestamp", json!(true))]),
            received_at,
        );

        assert_eq!(record.message(), "");
        assert_eq!(record.timestamp(), received_at);
        assert!(logs_contain("is not a string"));
        assert!(logs_contain("could not be parsed"));
    }

    #[test]
    fn test_to_append_events_preserves_order() {
        let records = vec![
            LogRecord::new("first", Utc.timestamp_millis_opt(30).unwrap()),
            LogRecord::new("second", Utc.timestamp_millis_opt(10).unwrap()),
            LogRecord::new("third", Utc.timestamp_millis_opt(20).unwrap()),
        ];

        let events = to_append_events(&records);

        assert_eq!(
            events,
            vec![
                AppendEvent {
                    timestamp: 30,
                    message: "first".to_string()
                },
                AppendEvent {
                    timestamp: 10,
                    message: "second".to_string()
                },
                AppendEvent {
                    timestamp: 20,
                    message: "third".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_append_event_serialization() {
        let event = AppendEvent {
            timestamp: 1_520_227_394_250,
            message: "Mon Mar 05 05:23:14 UTC 2018Info: { \"Time\": \"Mon, 5 Mar 2018\" }\u{0}"
                .to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["timestamp"], json!(1_520_227_394_250_i64));
        assert_eq!(
            value["message"],
            json!("Mon Mar 05 05:23:14 UTC 2018Info: { \"Time\": \"Mon, 5 Mar 2018\" }\u{0}")
        );
    }
}
