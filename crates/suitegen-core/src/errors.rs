//! Error types for the suitegen core library.
//!
//! One enum covers the whole pipeline. Variants fall into four families:
//! configuration/programmer errors (never retried), transient transport errors
//! (retried by the generator and correctors, see [`SuitegenError::is_transient`]),
//! state-machine misuse, and wrapped I/O / storage / parsing failures.

use std::fmt;

/// Whether a connection failure was caused by the connect deadline or by
/// something else (refused, DNS, TLS, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionFailure {
    Timeout,
    Other,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::Timeout => f.write_str("timeout"),
            ConnectionFailure::Other => f.write_str("other"),
        }
    }
}

/// Whether a backend-domain failure carried a structured error message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFailure {
    Known,
    Unknown,
}

impl fmt::Display for ResponseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFailure::Known => f.write_str("known"),
            ResponseFailure::Unknown => f.write_str("unknown"),
        }
    }
}

/// Top-level error enum for the suitegen core library.
#[derive(Debug, thiserror::Error)]
pub enum SuitegenError {
    // -- configuration / programmer errors ----------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported parameter '{name}' for platform {platform}")]
    UnsupportedParameter { name: String, platform: String },

    #[error("Chat already holds {0} message(s); the system prompt must come first")]
    ChatNotEmpty(usize),

    #[error("Incompatible API: {0}")]
    IncompatibleApi(String),

    #[error("Hyperparameter '{id}' is not supported by model {model}")]
    IncompatibleHyperparam { id: String, model: String },

    #[error("Wrong response format: {0}")]
    WrongResponseFormat(String),

    #[error("Prompt placeholder '{0}' was left unset")]
    UnsetPlaceholder(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -- model backend taxonomy ----------------------------------------------
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Connection error ({kind}): {message}")]
    Connection {
        kind: ConnectionFailure,
        message: String,
    },

    #[error("Response timed out: {0}")]
    ResponseTimedOut(String),

    #[error("Response error ({kind}): {message}")]
    Response {
        kind: ResponseFailure,
        message: String,
    },

    #[error("Context window saturated: {used} tokens used of {window}")]
    SaturatedContextWindow { used: u64, window: u64 },

    // -- sandbox -------------------------------------------------------------
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Sandbox command timed out after {0} ms")]
    SandboxTimedOut(u128),

    // -- resource / state misuse ---------------------------------------------
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Does not exist: {0}")]
    NotExists(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("A session is already in progress")]
    InProgress,

    #[error("No session was ever performed")]
    NeverPerformed,

    #[error("No previous generation was attempted")]
    InvalidPreviousGeneration,

    // -- wrapped -------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl SuitegenError {
    /// Transient failures consume one attempt of the enclosing loop and are
    /// then retried; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SuitegenError::Connection { .. }
                | SuitegenError::ResponseTimedOut(_)
                | SuitegenError::Response { .. }
                | SuitegenError::SaturatedContextWindow { .. }
                | SuitegenError::SandboxTimedOut(_)
        )
    }
}

pub type SuitegenResult<T> = Result<T, SuitegenError>;
