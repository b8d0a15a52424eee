// connect4_relay — two-player session relay for networked Connect Four.
//
// The relay is a thin coordinator: it admits at most two TCP clients,
// numbers them 1 and 2, forwards each move to the other player, and runs
// the post-game restart vote. It never looks at the board; legality and
// win detection stay on the clients.
//
// Module overview:
// - `session.rs`:    Session state behind one mutex: roster, vote round,
//                    first player, running flag. Every mutator broadcasts
//                    under the same lock.
// - `vote.rs`:       Restart-vote round (one ballot per connection,
//                    unanimous YES to continue).
// - `server.rs`:     Listener thread (polling accept), one reader thread per
//                    player, and the shutdown path.
// - `client.rs`:     `NetClient` transport and the `GameClient` used by a
//                    front-end, both with a background reader thread.
// - `turn_state.rs`: Client-side turn/winner/phase bookkeeping and the
//                    `Board` trait the front-end implements.
// - `error.rs`:      `RelayError` and `ClientError`.
//
// Dependencies: `connect4_protocol` (message types and framing).
//
// The relay runs as a standalone binary (`main.rs`) or embedded through
// `start_relay`.

pub mod client;
pub mod error;
pub mod server;
pub mod session;
pub mod turn_state;
pub mod vote;

pub use client::{GameClient, NetClient};
pub use error::{ClientError, RelayError};
pub use server::{RelayConfig, RelayHandle, start_relay};
pub use turn_state::{Board, Phase, PlayError, TurnState};
