//! Transport logging infrastructure.
//!
//! The transport queue reports what happens on the controller link through a
//! [`TransportLogHandler`]. The default [`TracingLogHandler`] forwards events
//! to `tracing`; applications can plug in their own handler to capture raw
//! frames elsewhere.
//!
//! # Example
//!
//! ```ignore
//! use dobiss_gateway::core::logging::{LogContext, TransportLogHandler, TransportLogEvent};
//!
//! struct MyLogHandler;
//!
//! #[async_trait]
//! impl TransportLogHandler for MyLogHandler {
//!     async fn on_log(&self, endpoint: &str, event: TransportLogEvent) {
//!         println!("[{}] {:?}", endpoint, event);
//!     }
//! }
//!
//! let log = LogContext::new(config.endpoint())
//!     .with_handler(Arc::new(MyLogHandler));
//! let queue = TransportQueue::with_log_context(config, log);
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::format_frame;

// ============================================================================
// Packet Direction
// ============================================================================

/// Direction of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketDirection {
    /// Frame written to the controller.
    Send,
    /// Frame read from the controller.
    Receive,
}

impl std::fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, ">>>"),
            Self::Receive => write!(f, "<<<"),
        }
    }
}

// ============================================================================
// Error Context
// ============================================================================

/// Link operation during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorContext {
    /// Opening the socket.
    Connect,
    /// Writing a request frame.
    Write,
    /// Reading a reply or idle data.
    Read,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

// ============================================================================
// Transport Log Event
// ============================================================================

/// Event reported by the transport queue.
#[derive(Debug, Clone)]
pub enum TransportLogEvent {
    /// Socket opened.
    Connected {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Connect duration in milliseconds.
        duration_ms: u64,
    },

    /// Socket dropped.
    Disconnected {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Why the socket was dropped (None = shutdown).
        reason: Option<String>,
    },

    /// Raw frame written or read.
    RawPacket {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Frame direction.
        direction: PacketDirection,
        /// Frame bytes.
        data: Vec<u8>,
    },

    /// A request got no reply in time.
    Timeout {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Deadline that expired.
        after: Duration,
    },

    /// Socket error.
    Error {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
        /// Error message.
        error: String,
        /// Operation that failed.
        context: ErrorContext,
    },
}

impl TransportLogEvent {
    /// Socket opened now.
    pub fn connected(duration: Duration) -> Self {
        Self::Connected {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Socket dropped now.
    pub fn disconnected(reason: Option<String>) -> Self {
        Self::Disconnected {
            timestamp: Utc::now(),
            reason,
        }
    }

    /// Frame written or read now.
    pub fn raw_packet(direction: PacketDirection, data: &[u8]) -> Self {
        Self::RawPacket {
            timestamp: Utc::now(),
            direction,
            data: data.to_vec(),
        }
    }

    /// Request timed out now.
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timestamp: Utc::now(),
            after,
        }
    }

    /// Socket error now.
    pub fn error(error: impl Into<String>, context: ErrorContext) -> Self {
        Self::Error {
            timestamp: Utc::now(),
            error: error.into(),
            context,
        }
    }
}

// ============================================================================
// Transport Log Handler Trait
// ============================================================================

/// Receiver of transport log events.
#[async_trait]
pub trait TransportLogHandler: Send + Sync {
    /// Handle a log event from the link to `endpoint`.
    async fn on_log(&self, endpoint: &str, event: TransportLogEvent);
}

// ============================================================================
// Tracing Handler
// ============================================================================

/// Handler that forwards events to `tracing`.
pub struct TracingLogHandler;

#[async_trait]
impl TransportLogHandler for TracingLogHandler {
    async fn on_log(&self, endpoint: &str, event: TransportLogEvent) {
        use tracing::{debug, info, trace, warn};

        match &event {
            TransportLogEvent::Connected { duration_ms, .. } => {
                info!(endpoint = %endpoint, duration_ms = duration_ms, "Controller connected");
            }
            TransportLogEvent::Disconnected { reason, .. } => {
                if let Some(reason) = reason {
                    warn!(endpoint = %endpoint, reason = %reason, "Controller disconnected");
                } else {
                    info!(endpoint = %endpoint, "Controller disconnected");
                }
            }
            TransportLogEvent::RawPacket { direction, data, .. } => {
                trace!(
                    endpoint = %endpoint,
                    direction = %direction,
                    size = data.len(),
                    data = %format_frame(data),
                    "Raw frame"
                );
            }
            TransportLogEvent::Timeout { after, .. } => {
                debug!(endpoint = %endpoint, after_ms = after.as_millis() as u64, "Request timed out");
            }
            TransportLogEvent::Error { error, context, .. } => {
                warn!(endpoint = %endpoint, error = %error, context = %context, "Link error");
            }
        }
    }
}

// ============================================================================
// Log Context
// ============================================================================

/// Handler bound to one endpoint, owned by the transport.
#[derive(Clone)]
pub struct LogContext {
    endpoint: String,
    handler: Option<Arc<dyn TransportLogHandler>>,
}

impl LogContext {
    /// Create a log context without a handler.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handler: None,
        }
    }

    /// Set the handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn TransportLogHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Log an event.
    pub async fn log(&self, event: TransportLogEvent) {
        if let Some(handler) = &self.handler {
            handler.on_log(&self.endpoint, event).await;
        }
    }
}
