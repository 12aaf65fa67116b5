//! Error types for the Dobiss gateway.
//!
//! Errors fall in four groups:
//!
//! - **Configuration** (`Config`): invalid modules, addresses or outputs.
//!   Fatal at startup, the operator has to fix the configuration.
//! - **Codec** (`Decode`): a reply could not be decoded. Fatal for that
//!   operation only. Module types are a closed enum, so an unmapped type
//!   can't reach the codecs.
//! - **Transport** (`RequestTimeout`, `Connection`, `ConnectionClosed`, `Io`):
//!   surfaced to the pending request; the next poll retries naturally.
//! - **Everything else** bubbles up to the runtime, which restarts the
//!   pipeline after a cooldown.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A reply frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// No reply arrived before the deadline.
    #[error("Request timed out after {}ms", .0.as_millis())]
    RequestTimeout(Duration),

    /// Connecting to the controller failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The controller closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown module or output.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported by this dialect.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Pub/sub collaborator failure.
    #[error("Bus error: {0}")]
    Bus(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker gone, channel closed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error must abort startup.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error belongs to the transport layer.
    ///
    /// Transport errors self-heal: the next scheduled poll retries.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout(_) | Self::Connection(_) | Self::ConnectionClosed | Self::Io(_)
        )
    }

    /// Whether this error comes from decoding a frame.
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
