//! Error types for recovery-ops.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Smoke test error: {0}")]
    Smoke(#[from] SmokeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Outbound delivery failures. Always recovered by the fallback store.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No transport configured")]
    Unavailable,

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Malformed inbound content. The single offending item is skipped.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty message")]
    Empty,

    #[error("Message could not be parsed as RFC 822")]
    Malformed,

    #[error("Message has no sender address")]
    MissingSender,

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
}

/// File persistence errors (fallback files, TODO records).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mailbox polling errors. The current poll is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("IMAP connection failed: {0}")]
    Connect(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP login failed")]
    LoginFailed,

    #[error("IMAP command {command} failed: {response}")]
    Command { command: String, response: String },

    #[error("IMAP connection closed unexpectedly")]
    Closed,

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Poll task failed: {0}")]
    Task(String),
}

/// Smoke test runner errors (setup only; failing checks are results, not errors).
#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("Invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Result type alias for recovery-ops.
pub type Result<T> = std::result::Result<T, Error>;
