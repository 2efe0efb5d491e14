//! Wire-level contract between the model accessor and a concrete backend.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{ConnectionFailure, ResponseFailure, SuitegenError, SuitegenResult};
use crate::models::{ChatMessage, Platform};

/// Maximum length of backend error bodies carried into error messages.
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// One request: model, ordered chat, hyperparameters and the stream flag.
#[derive(Clone, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    /// Sampling options (`WireSlot::Options`).
    pub options: Map<String, Value>,
    /// Top-level request flags (`WireSlot::Root`).
    pub root: Map<String, Value>,
    pub stream: bool,
}

/// Token usage reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.response_tokens
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    /// `None` when the backend does not report counters.
    pub usage: Option<Usage>,
}

/// A concrete LLM platform. Implementations perform exactly one round trip
/// per `send` and never retry.
pub trait ChatBackend: Send {
    fn platform(&self) -> Platform;

    fn send(&self, request: &ChatRequest<'_>, timeout: Duration) -> SuitegenResult<ChatReply>;
}

// ---------------------------------------------------------------------------
// HTTP error normalization shared by the reqwest-based backends
// ---------------------------------------------------------------------------

/// Truncate a string for display (Unicode-safe).
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> SuitegenError {
    let message = err.to_string();
    if err.is_connect() && err.is_timeout() {
        SuitegenError::Connection {
            kind: ConnectionFailure::Timeout,
            message,
        }
    } else if err.is_connect() {
        SuitegenError::Connection {
            kind: ConnectionFailure::Other,
            message,
        }
    } else if err.is_timeout() {
        SuitegenError::ResponseTimedOut(message)
    } else if err.is_decode() || err.is_body() {
        SuitegenError::Response {
            kind: ResponseFailure::Unknown,
            message,
        }
    } else {
        SuitegenError::Connection {
            kind: ConnectionFailure::Other,
            message,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Object { message: String },
}

/// Extract the `error` message from a JSON error body, if there is one.
pub(crate) fn known_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    Some(match parsed.error {
        ErrorField::Text(text) => text,
        ErrorField::Object { message } => message,
    })
}

/// Map a non-success HTTP status and its body into the shared taxonomy.
pub(crate) fn map_status_error(status: u16, body: &str) -> SuitegenError {
    let detail = known_error_message(body);
    if status == 400 || status == 422 {
        let message = detail.unwrap_or_else(|| truncate_str(body, MAX_ERROR_CONTENT_LEN).to_string());
        return SuitegenError::InvalidPrompt(format!("HTTP {status}: {message}"));
    }
    match detail {
        Some(message) => SuitegenError::Response {
            kind: ResponseFailure::Known,
            message: format!("HTTP {status}: {message}"),
        },
        None => SuitegenError::Response {
            kind: ResponseFailure::Unknown,
            message: format!(
                "HTTP {status}: {}",
                truncate_str(body, MAX_ERROR_CONTENT_LEN)
            ),
        },
    }
}
