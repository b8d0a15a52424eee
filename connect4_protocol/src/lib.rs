// connect4_protocol — wire protocol for the Connect Four session relay.
//
// This crate defines the message types, framing, and serialization used by
// the relay (`connect4_relay`) and game clients to talk over TCP. It is
// shared between both sides and knows nothing about boards or rendering.
//
// Module overview:
// - `types.rs`:    `PlayerNumber`, `Vote`, `VoteTally`.
// - `message.rs`:  `ClientMessage` / `ServerMessage` JSON enums, the
//                  plain-text `Signal`s and handshake line, decode errors.
// - `framing.rs`:  Newline-delimited framing: `write_line` and the
//                  carry-over `LineBuffer` used by every reader.
//
// Design decisions:
// - **JSON lines.** One object per line, tagged by `type`, so the protocol
//   stays readable with `nc` and compatible with existing clients.
// - **Moves are opaque to the relay.** `column`/`piece` are plain integers;
//   legality is the clients' business.
// - **No async runtime.** Framing works on `std::io::Write` and raw byte
//   slices, so it fits blocking thread-per-connection servers.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{FramingError, LineBuffer, MAX_LINE_LEN, READ_CHUNK, write_line};
pub use message::{
    ClientMessage, DecodeError, Handshake, Inbound, ServerMessage, Signal, decode_client_line,
    decode_handshake, decode_server_line, encode, encode_handshake,
};
pub use types::{PlayerNumber, Vote, VoteTally};
