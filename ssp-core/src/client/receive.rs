//! The per-client receive loop.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::event::{ClientEvent, EventHandler};
use crate::codec::read_message;
use crate::error::SspError;
use crate::message::{Message, MessageType};

/// Why a receive loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// The owner cleared the running flag or cancelled the loop.
    Stopped,
    /// The helper sent `Disconnect`.
    Disconnected,
    /// Handshake, framing or decode failure.
    Failed(SspError),
}

impl LoopExit {
    /// Whether the owner should treat this exit as a dropped session.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, LoopExit::Stopped)
    }
}

async fn next_message<R>(reader: &mut R, cancel: &CancellationToken) -> Option<Result<Message, SspError>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        r = read_message(reader) => Some(r),
    }
}

fn read_failure(e: SspError) -> SspError {
    match e {
        SspError::Framing { .. } => e,
        other => SspError::ProtocolRead(other.to_string()),
    }
}

/// Read frames from `reader` and dispatch them to `handler` until the
/// helper disconnects, a frame is bad, or the owner stops the loop.
///
/// The first frame must be `ConnectorOk`. A `Disconnect` frame is
/// dispatched before returning; failure exits dispatch nothing, the
/// caller decides how to report them.
pub async fn run_receive_loop<R>(
    reader: &mut R,
    handler: &dyn EventHandler,
    running: &AtomicBool,
    cancel: &CancellationToken,
    address: &str,
) -> LoopExit
where
    R: AsyncRead + Unpin + ?Sized,
{
    match next_message(reader, cancel).await {
        None => return LoopExit::Stopped,
        Some(Err(e)) => {
            warn!(%address, "receive error before handshake: {e}");
            return LoopExit::Failed(read_failure(e));
        }
        Some(Ok(msg)) if msg.kind() != MessageType::ConnectorOk => {
            warn!(%address, kind = %msg.kind(), "protocol error: first frame was not ConnectorOk");
            return LoopExit::Failed(SspError::ProtocolHandshake(msg.kind()));
        }
        Some(Ok(_)) => debug!(%address, "connector ready"),
    }

    while running.load(Ordering::SeqCst) {
        let msg = match next_message(reader, cancel).await {
            None => return LoopExit::Stopped,
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(%address, "receive error: {e}");
                return LoopExit::Failed(read_failure(e));
            }
        };

        let event = match ClientEvent::from_message(&msg) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(%address, kind = %msg.kind(), "ignoring frame");
                continue;
            }
            Err(e) => {
                warn!(%address, kind = %msg.kind(), "undecodable frame: {e}");
                return LoopExit::Failed(SspError::ProtocolRead(e.to_string()));
            }
        };

        // Running may have been cleared while we were blocked in the read.
        if !running.load(Ordering::SeqCst) {
            return LoopExit::Stopped;
        }

        let disconnect = matches!(event, ClientEvent::Disconnected);
        handler.on_event(event);
        if disconnect {
            debug!(%address, "helper reported disconnect");
            return LoopExit::Disconnected;
        }
    }

    LoopExit::Stopped
}
