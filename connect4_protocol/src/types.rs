// Core value types for the Connect Four protocol.
//
// `PlayerNumber` is the relay-assigned seat (1 or 2) that doubles as the
// piece value on the board. `Vote` and `VoteTally` carry the post-game
// restart ballot. All three serialize to the exact JSON shapes the wire
// catalogue uses: a bare integer, `"YES"`/`"NO"`, and `{"YES": n, "NO": n}`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Seat number assigned by the relay on admission. Player 1 owns turn index
/// 0, player 2 owns turn index 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerNumber(pub u8);

impl PlayerNumber {
    pub const ONE: PlayerNumber = PlayerNumber(1);
    pub const TWO: PlayerNumber = PlayerNumber(2);

    /// Zero-based turn index owned by this player.
    pub fn turn_index(self) -> u8 {
        self.0.saturating_sub(1)
    }

    /// The opposing seat in a two-player game.
    pub fn other(self) -> PlayerNumber {
        if self == Self::ONE { Self::TWO } else { Self::ONE }
    }

    /// Board piece value for this player.
    pub fn piece(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for PlayerNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A restart ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Yes,
    No,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vote::Yes => "YES",
            Vote::No => "NO",
        })
    }
}

/// Running count of restart ballots in the current round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    #[serde(rename = "YES")]
    pub yes: u32,
    #[serde(rename = "NO")]
    pub no: u32,
}

impl VoteTally {
    pub fn total(&self) -> u32 {
        self.yes + self.no
    }

    pub fn record(&mut self, vote: Vote) {
        match vote {
            Vote::Yes => self.yes += 1,
            Vote::No => self.no += 1,
        }
    }

    /// Take back one ballot previously counted by `record`.
    pub fn retract(&mut self, vote: Vote) {
        match vote {
            Vote::Yes => self.yes = self.yes.saturating_sub(1),
            Vote::No => self.no = self.no.saturating_sub(1),
        }
    }
}
