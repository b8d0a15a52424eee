// Error types for the relay and its client.
//
// The relay itself has almost nothing that can fail once it is running:
// per-connection problems are logged and degrade only that connection. The
// only fallible step surfaced to callers is binding the listener. The client
// side has more to report, mostly around the handshake.

use std::io;

use connect4_protocol::DecodeError;
use thiserror::Error;

use crate::turn_state::PlayError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("listener setup failed: {0}")]
    Listener(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("session is full")]
    SessionFull,
    #[error("bad handshake: {0}")]
    Handshake(#[from] DecodeError),
    #[error("connection closed before the handshake completed")]
    ClosedDuringHandshake,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Play(#[from] PlayError),
}
