// Protocol messages for client-relay communication.
//
// Two enums define the JSON vocabulary, tagged by a `type` field:
// - `ClientMessage`: sent by game clients to the relay.
// - `ServerMessage`: sent by the relay to game clients.
//
// Three server lines are not JSON: the bare player number sent once right
// after admission, and the `FULL` / `SERVER_SHUTDOWN` signals. `Signal` and
// `Handshake` cover those. On the client side every line after the
// handshake decodes to an `Inbound`, which is either a signal or a JSON
// message.
//
// `move` has the same shape in both directions; the relay re-encodes the
// client's `{column, piece}` into a `ServerMessage::Move` without looking at
// the values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PlayerNumber, Vote, VoteTally};

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A piece dropped into `column`.
    Move { column: i32, piece: i32 },
    /// Post-game restart ballot.
    Restart { vote: Vote },
    /// Sent by clients after a YES reset. Carries no protocol weight.
    ResetConfirm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<PlayerNumber>,
    },
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The other player's move, relayed verbatim.
    Move { column: i32, piece: i32 },
    /// Tally after every ballot, including the deciding one.
    VoteStatus { votes: VoteTally },
    /// Outcome of a completed ballot.
    Reset { result: Vote },
    /// A new round begins; `turn` is the zero-based index of the first mover.
    GameStart {
        turn: u8,
        first_player: PlayerNumber,
    },
}

/// Plain-text control lines sent outside the JSON envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The session already has two players; the connection is closed.
    Full,
    /// The relay is going away.
    ServerShutdown,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Full => "FULL",
            Signal::ServerShutdown => "SERVER_SHUTDOWN",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    fn from_line(line: &[u8]) -> Option<Signal> {
        match line {
            b"FULL" => Some(Signal::Full),
            b"SERVER_SHUTDOWN" => Some(Signal::ServerShutdown),
            _ => None,
        }
    }
}

/// A decoded server line after the handshake.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    Signal(Signal),
}

/// Result of the first line a client reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handshake {
    Assigned(PlayerNumber),
    Full,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a player number, got {0:?}")]
    PlayerNumber(String),
}

/// Serialize a message to its JSON line body (no trailing newline).
pub fn encode<T: Serialize>(msg: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(msg)
}

/// Decode one line received by the relay.
pub fn decode_client_line(line: &[u8]) -> Result<ClientMessage, DecodeError> {
    Ok(serde_json::from_slice(line.trim_ascii())?)
}

/// Decode one line received by a client after the handshake.
pub fn decode_server_line(line: &[u8]) -> Result<Inbound, DecodeError> {
    let line = line.trim_ascii();
    if let Some(signal) = Signal::from_line(line) {
        return Ok(Inbound::Signal(signal));
    }
    Ok(Inbound::Message(serde_json::from_slice(line)?))
}

/// Decode the first line a client receives: its player number, or `FULL`.
pub fn decode_handshake(line: &[u8]) -> Result<Handshake, DecodeError> {
    let line = line.trim_ascii();
    if Signal::from_line(line) == Some(Signal::Full) {
        return Ok(Handshake::Full);
    }
    let text = String::from_utf8_lossy(line);
    match text.parse::<u8>() {
        Ok(n) if n > 0 => Ok(Handshake::Assigned(PlayerNumber(n))),
        _ => Err(DecodeError::PlayerNumber(text.into_owned())),
    }
}

/// The handshake line body for an admitted player.
pub fn encode_handshake(player: PlayerNumber) -> Vec<u8> {
    player.to_string().into_bytes()
}
