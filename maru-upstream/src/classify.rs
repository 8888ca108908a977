//! Mapping raw upstream answers onto [`UpstreamOutcome`].

use crate::transport::{RawResponse, TransportError};
use maru_core::constants::MAX_ERROR_MESSAGE_CHARS;
use maru_core::UpstreamOutcome;
use serde_json::Value;
use std::sync::Arc;

/// Classify an HTTP answer.
///
/// - 2xx: `Success` with the decoded body (`null` when empty); a body that
///   is not JSON is reported as a 502 `ServerError`.
/// - 4xx: `ClientError` with the extracted message.
/// - 5xx and anything else: `ServerError` with the extracted message.
pub fn classify_response(response: RawResponse) -> UpstreamOutcome {
    let code = response.status;
    match code {
        200..=299 => {
            if response.body.iter().all(u8::is_ascii_whitespace) {
                return UpstreamOutcome::Success(Arc::new(Value::Null));
            }
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(value) => UpstreamOutcome::Success(Arc::new(value)),
                Err(e) => UpstreamOutcome::ServerError {
                    code: 502,
                    message: format!("invalid JSON in {} response: {}", code, e),
                },
            }
        }
        400..=499 => UpstreamOutcome::ClientError {
            code,
            message: extract_error_message(code, &response.body),
        },
        _ => UpstreamOutcome::ServerError {
            code,
            message: extract_error_message(code, &response.body),
        },
    }
}

/// Classify a failure below HTTP.
pub fn classify_transport_error(error: TransportError) -> UpstreamOutcome {
    match error {
        TransportError::Timeout => UpstreamOutcome::Timeout,
        TransportError::Connect(reason) | TransportError::Other(reason) => {
            UpstreamOutcome::ConnectionFailure { reason }
        }
    }
}

/// Human-readable message from an upstream error body.
///
/// Prefers the `message` field, then `detail`, of a JSON object body;
/// otherwise uses the raw text. Long messages are truncated.
pub fn extract_error_message(code: u16, body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
        ["message", "detail"].iter().find_map(|field| {
            v.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    });

    let message = match from_json {
        Some(message) => message,
        None => String::from_utf8_lossy(body).trim().to_string(),
    };

    if message.is_empty() {
        return format!("HTTP {}", code);
    }
    truncate(&message, MAX_ERROR_MESSAGE_CHARS)
}

fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}
