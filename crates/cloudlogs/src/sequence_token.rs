// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recovery of the expected sequence token from a conflict message.
//!
//! CloudWatch Logs rejects an append made with a stale token with a message
//! such as:
//!
//! ```text
//! The given sequenceToken is invalid. The next expected sequenceToken is: 4959...
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::SequenceTokenError;

const EXPECTED_TOKEN_PATTERN: &str = r"(?i)next expected sequenceToken is: (\S+)";

/// Token reported for a stream that has never received events.
const EMPTY_STREAM_TOKEN: &str = "null";

#[allow(clippy::expect_used)]
fn expected_token_matcher() -> &'static Regex {
    static MATCHER: OnceLock<Regex> = OnceLock::new();
    MATCHER.get_or_init(|| Regex::new(EXPECTED_TOKEN_PATTERN).expect("invalid token pattern"))
}

/// Extracts the token the stream expects next.
///
/// The message must embed exactly one token. `Ok(None)` means the stream
/// expects no token at all.
pub fn extract_expected_token(message: &str) -> Result<Option<String>, SequenceTokenError> {
    let tokens: Vec<&str> = expected_token_matcher()
        .captures_iter(message)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
        .collect();

    match tokens.as_slice() {
        [] => Err(SequenceTokenError::Missing(message.to_string())),
        [token] if *token == EMPTY_STREAM_TOKEN => Ok(None),
        [token] => Ok(Some((*token).to_string())),
        _ => Err(SequenceTokenError::Ambiguous {
            count: tokens.len(),
            message: message.to_string(),
        }),
    }
}
