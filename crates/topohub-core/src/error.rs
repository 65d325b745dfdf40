//! Error types for topohub core

use thiserror::Error;

/// Result type alias using the topohub Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the topology hub
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from sockets and files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LMDB/heed database errors
    #[error("Database error: {0}")]
    Database(#[from] heed::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed frames, CRC mismatches, handshake failures
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload rejected by schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Envelope carries a type outside the message enumeration
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Schema asset missing or not compilable
    #[error("Schema error: {0}")]
    Schema(String),

    /// Persistent backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration (listen/peer addresses, thresholds)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failures
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether this error means the message itself was bad (as opposed to
    /// the hub failing to process a good message)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownMessageType(_) | Self::Json(_)
        )
    }
}
