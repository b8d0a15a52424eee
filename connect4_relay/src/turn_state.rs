// Client-side mirror of the game's turn bookkeeping.
//
// `TurnState` tracks whose turn it is, who won, the last vote tally, and
// where the client is in the round. It is driven by exactly two things:
// envelopes relayed by the server (`apply`) and the local player's own
// completed move (`play_local`). It never inspects board contents to work
// out whose turn it is; the board is only asked to place pieces and judge
// wins, through the `Board` trait.
//
// The relay does no validation, so this type trusts the order in which
// envelopes arrive. A relayed move that the local board rejects is logged
// and ignored; the two boards have diverged at that point and nothing here
// tries to repair it.

use connect4_protocol::{Inbound, PlayerNumber, ServerMessage, Signal, Vote, VoteTally};
use log::{debug, info, warn};
use thiserror::Error;

/// Board geometry and win detection, supplied by the front-end.
pub trait Board {
    /// Drop `piece` into `column`. Returns `false`, leaving the board
    /// untouched, if the column is out of range or already full.
    fn drop_piece(&mut self, column: i32, piece: i32) -> bool;

    /// Whether `piece` now has four in a row.
    fn is_winning(&self, piece: i32) -> bool;

    /// Whether no column can take another piece.
    fn is_full(&self) -> bool {
        false
    }

    /// Empty the board for a new round.
    fn clear(&mut self);
}

/// Where the client is within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Moves are being exchanged.
    Playing,
    /// Someone won (or the board filled up); waiting for this player's vote.
    GameOver,
    /// This player voted and is waiting for the result.
    Voted(Vote),
    /// Restart agreed; the board is cleared and no one may move until
    /// `game_start` says who opens.
    Starting,
    /// The pairing ended: a NO result, or the server went away.
    Finished,
}

/// Whether the connection should stay open after an envelope was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Continue,
    Terminate,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PlayError {
    #[error("it is not this player's turn")]
    NotYourTurn,
    #[error("no game in progress")]
    GameNotInProgress,
    #[error("column {0} cannot take a piece")]
    ColumnUnavailable(i32),
    #[error("nothing to vote on")]
    NoVoteOpen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnState {
    player: PlayerNumber,
    turn: u8,
    first_player: PlayerNumber,
    winner: Option<i32>,
    phase: Phase,
    votes: VoteTally,
    server_shutdown: bool,
}

impl TurnState {
    /// Fresh state for the first round, which player 1 always opens.
    pub fn new(player: PlayerNumber) -> Self {
        Self {
            player,
            turn: 0,
            first_player: PlayerNumber::ONE,
            winner: None,
            phase: Phase::Playing,
            votes: VoteTally::default(),
            server_shutdown: false,
        }
    }

    pub fn player(&self) -> PlayerNumber {
        self.player
    }

    /// Zero-based index of the player to move.
    pub fn turn(&self) -> u8 {
        self.turn
    }

    pub fn my_turn(&self) -> bool {
        self.phase == Phase::Playing && self.turn == self.player.turn_index()
    }

    pub fn first_player(&self) -> PlayerNumber {
        self.first_player
    }

    /// Piece value of the winner of the last finished game.
    pub fn winner(&self) -> Option<i32> {
        self.winner
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Tally from the most recent `vote_status`.
    pub fn votes(&self) -> VoteTally {
        self.votes
    }

    pub fn server_shutdown(&self) -> bool {
        self.server_shutdown
    }

    /// Apply one inbound envelope from the relay.
    pub fn apply<B: Board>(&mut self, inbound: &Inbound, board: &mut B) -> Applied {
        match inbound {
            Inbound::Message(ServerMessage::GameStart { turn, first_player }) => {
                board.clear();
                self.start_round(*turn, *first_player);
                info!(
                    "game start: player {first_player} first, my turn: {}",
                    self.my_turn()
                );
            }
            Inbound::Message(ServerMessage::Move { column, piece }) => {
                if board.drop_piece(*column, *piece) {
                    self.after_move(*piece, board);
                } else {
                    warn!("relayed move column={column} piece={piece} does not fit the board");
                }
            }
            Inbound::Message(ServerMessage::VoteStatus { votes }) => {
                debug!("vote status: {votes:?}");
                self.votes = *votes;
            }
            Inbound::Message(ServerMessage::Reset { result: Vote::Yes }) => {
                board.clear();
                self.winner = None;
                self.votes = VoteTally::default();
                self.phase = Phase::Starting;
                info!("restart agreed, waiting for game start");
            }
            Inbound::Message(ServerMessage::Reset { result: Vote::No }) => {
                self.phase = Phase::Finished;
                info!("restart declined, leaving");
                return Applied::Terminate;
            }
            Inbound::Signal(Signal::ServerShutdown) => {
                self.server_shutdown = true;
                self.phase = Phase::Finished;
                info!("server shutting down");
                return Applied::Terminate;
            }
            Inbound::Signal(Signal::Full) => {
                self.phase = Phase::Finished;
                return Applied::Terminate;
            }
        }
        Applied::Continue
    }

    /// Apply the local player's own move. On success the caller sends the
    /// matching `move` envelope.
    pub fn play_local<B: Board>(&mut self, column: i32, board: &mut B) -> Result<(), PlayError> {
        if self.phase != Phase::Playing {
            return Err(PlayError::GameNotInProgress);
        }
        if !self.my_turn() {
            return Err(PlayError::NotYourTurn);
        }
        let piece = self.player.piece();
        if !board.drop_piece(column, piece) {
            return Err(PlayError::ColumnUnavailable(column));
        }
        self.after_move(piece, board);
        Ok(())
    }

    /// Record this player's ballot. On success the caller sends the
    /// matching `restart` envelope.
    pub fn cast_vote(&mut self, vote: Vote) -> Result<(), PlayError> {
        if self.phase != Phase::GameOver {
            return Err(PlayError::NoVoteOpen);
        }
        self.phase = Phase::Voted(vote);
        Ok(())
    }

    fn start_round(&mut self, turn: u8, first_player: PlayerNumber) {
        self.turn = turn;
        self.first_player = first_player;
        self.winner = None;
        self.phase = Phase::Playing;
        self.votes = VoteTally::default();
    }

    /// Bookkeeping after `piece` landed: either the game is over or the
    /// turn passes to the other player.
    fn after_move<B: Board>(&mut self, piece: i32, board: &B) {
        if board.is_winning(piece) {
            self.winner = Some(piece);
            self.phase = Phase::GameOver;
            info!("player {piece} wins");
        } else if board.is_full() {
            self.phase = Phase::GameOver;
            info!("board full, no winner");
        } else {
            self.turn = if piece == 1 { 1 } else { 0 };
        }
    }
}
