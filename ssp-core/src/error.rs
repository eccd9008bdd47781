//! Domain-specific error types for SSP stream ingest.
//!
//! All fallible operations return `Result<T, SspError>`.
//! Malformed frames surface as typed errors, never panics.

use thiserror::Error;

use crate::message::MessageType;

/// The canonical error type for SSP stream ingest.
#[derive(Debug, Error)]
pub enum SspError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The helper process could not be spawned.
    #[error("failed to launch transport `{program}`: {source}")]
    TransportLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ── Protocol Errors ──────────────────────────────────────────
    /// The first frame from the helper was not `ConnectorOk`.
    #[error("protocol handshake failed: expected ConnectorOk, got {0}")]
    ProtocolHandshake(MessageType),

    /// The receive loop could not read or interpret a frame.
    #[error("protocol read error: {0}")]
    ProtocolRead(String),

    /// The byte source closed mid-header or mid-body.
    #[error("framing error: expected {expected} bytes, got {actual}")]
    Framing { expected: usize, actual: usize },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A payload was shorter than its fixed layout or otherwise malformed.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    /// The declared payload exceeds the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A lifecycle method was called from a phase that does not allow it.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Media Errors ─────────────────────────────────────────────
    /// The decoder collaborator rejected an access unit.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Device Control Errors ────────────────────────────────────
    /// The device-control collaborator returned a non-success reply.
    #[error("device control error: {0}")]
    DeviceControl(String),

    // ── Plumbing ─────────────────────────────────────────────────
    /// The IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Encoding or decoding of a JSON document failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl SspError {
    /// Returns `true` for errors that end a receive loop and should be
    /// treated as a disconnect.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SspError::ProtocolHandshake(_)
                | SspError::ProtocolRead(_)
                | SspError::Framing { .. }
                | SspError::UnknownVariant { .. }
                | SspError::InvalidPayload { .. }
                | SspError::PayloadTooLarge { .. }
                | SspError::Io(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SspError {
    fn from(s: String) -> Self {
        SspError::Other(s)
    }
}

impl From<&str> for SspError {
    fn from(s: &str) -> Self {
        SspError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SspError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SspError::ChannelClosed
    }
}

impl From<serde_json::Error> for SspError {
    fn from(e: serde_json::Error) -> Self {
        SspError::Encoding(e.to_string())
    }
}
