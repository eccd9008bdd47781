//! # ssp-core
//!
//! Ingest library for SSP camera streams.
//!
//! This crate contains:
//! - **Message**: pipe frame header, message types and payload layouts
//! - **Codec**: `read_message` for the receive loop, `SspCodec` for framed I/O
//! - **Transport**: `Launcher` seam and the helper `ProcessLauncher`
//! - **Client**: `ProtocolClient` state machine and receive loop
//! - **Connection**: `Connection`, `ConnectionRegistry` and the decode pipeline
//! - **Reconnect**: `ReconnectCoordinator` with per-connection backoff
//! - **Status**: refcounted `DeviceStatusRegistry` over `DeviceControl`
//! - **Source**: `StreamSource`, one configured camera feed
//! - **Error**: `SspError`, typed `thiserror` error hierarchy

pub mod client;
pub mod codec;
pub mod connection;
pub mod context;
pub mod control;
pub mod error;
pub mod media;
pub mod message;
pub mod reconnect;
pub mod source;
pub mod state;
pub mod status;
pub mod task;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{ClientCallbacks, ClientEvent, EventHandler, ProtocolClient};
pub use codec::{SspCodec, read_message};
pub use connection::{Connection, ConnectionConfig, ConnectionId, ConnectionRegistry, SyncMode};
pub use context::{ActiveAddresses, SspContext, SspContextBuilder};
pub use control::{DeviceControl, DeviceControlFactory};
pub use error::SspError;
pub use media::{CodecId, MediaBackend, MediaSink, PassthroughBackend};
pub use message::{HEADER_SIZE, MAX_PAYLOAD_SIZE, Message, MessageType};
pub use reconnect::{BackoffPolicy, ReconnectCoordinator};
pub use source::{Encoder, SourceSettings, StreamSource, UpdateOutcome};
pub use state::ClientPhase;
pub use status::{DeviceStatus, DeviceStatusRegistry, StreamRequest};
pub use task::TaskPool;
pub use transport::{Launcher, ProcessLauncher, Transport};
