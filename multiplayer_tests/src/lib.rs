// Test-only game client for multiplayer integration tests.
//
// Wraps the real `GameClient` (from `connect4_relay::client`) around a real
// 6x7 `GridBoard` to provide a synchronous, test-friendly API for
// exercising the full pipeline: relay → join → move → relayed move →
// board update → win → restart vote → next round.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `GameClient::snapshot()`). Networking and turn
// bookkeeping use the same code paths a front-end would.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use connect4_protocol::{PlayerNumber, Vote};
use connect4_relay::client::GameClient;
use connect4_relay::error::ClientError;
use connect4_relay::turn_state::{Board, TurnState};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const ROWS: usize = 6;
pub const COLUMNS: usize = 7;

/// Standard Connect Four grid. Row 0 is the bottom; 0 marks an empty cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GridBoard {
    cells: [[i32; COLUMNS]; ROWS],
}

impl GridBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, row: usize, column: usize) -> i32 {
        self.cells[row][column]
    }

    /// Number of pieces in `column`.
    pub fn height(&self, column: usize) -> usize {
        self.cells.iter().take_while(|row| row[column] != 0).count()
    }

    pub fn piece_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&c| c != 0).count()
    }

    fn run_from(&self, row: usize, column: usize, dr: isize, dc: isize, piece: i32) -> bool {
        (0..4).all(|step| {
            let r = row as isize + dr * step;
            let c = column as isize + dc * step;
            (0..ROWS as isize).contains(&r)
                && (0..COLUMNS as isize).contains(&c)
                && self.cells[r as usize][c as usize] == piece
        })
    }
}

impl Board for GridBoard {
    fn drop_piece(&mut self, column: i32, piece: i32) -> bool {
        let Ok(column) = usize::try_from(column) else {
            return false;
        };
        if column >= COLUMNS {
            return false;
        }
        let row = self.height(column);
        if row >= ROWS {
            return false;
        }
        self.cells[row][column] = piece;
        true
    }

    fn is_winning(&self, piece: i32) -> bool {
        const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];
        (0..ROWS).any(|row| {
            (0..COLUMNS).any(|column| {
                DIRECTIONS
                    .iter()
                    .any(|&(dr, dc)| self.run_from(row, column, dr, dc, piece))
            })
        })
    }

    fn is_full(&self) -> bool {
        (0..COLUMNS).all(|column| self.height(column) == ROWS)
    }

    fn clear(&mut self) {
        self.cells = [[0; COLUMNS]; ROWS];
    }
}

/// A test game client wrapping a real `GameClient` and `GridBoard`.
pub struct TestGameClient {
    client: GameClient<GridBoard>,
}

impl TestGameClient {
    /// Connect to a relay and read the assigned player number.
    pub fn connect(addr: SocketAddr) -> Self {
        let client = GameClient::connect(&addr.to_string(), GridBoard::new())
            .expect("TestGameClient::connect failed");
        Self { client }
    }

    pub fn player(&self) -> PlayerNumber {
        self.client.player()
    }

    pub fn play(&mut self, column: i32) {
        self.try_play(column)
            .unwrap_or_else(|e| panic!("player {} column {column}: {e}", self.player()));
    }

    pub fn try_play(&mut self, column: i32) -> Result<(), ClientError> {
        self.client.play_column(column)
    }

    pub fn vote(&mut self, vote: Vote) {
        self.try_vote(vote)
            .unwrap_or_else(|e| panic!("player {} vote {vote}: {e}", self.player()));
    }

    pub fn try_vote(&mut self, vote: Vote) -> Result<(), ClientError> {
        self.client.vote(vote)
    }

    pub fn state(&self) -> TurnState {
        self.client.snapshot()
    }

    pub fn board(&self) -> GridBoard {
        self.client.with_board(GridBoard::clone)
    }

    /// Blocking poll until the turn state satisfies `check`. Returns the
    /// matching snapshot.
    pub fn wait_for(&self, what: &str, check: impl Fn(&TurnState) -> bool) -> TurnState {
        let start = Instant::now();
        loop {
            let state = self.state();
            if check(&state) {
                return state;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "player {} timed out waiting for {what}; last state {state:?}",
                self.player()
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until it is this player's turn.
    pub fn wait_for_my_turn(&self) -> TurnState {
        self.wait_for("my turn", TurnState::my_turn)
    }

    /// Blocking poll until the board holds `count` pieces.
    pub fn wait_for_pieces(&self, count: usize) -> GridBoard {
        let start = Instant::now();
        loop {
            let board = self.board();
            if board.piece_count() == count {
                return board;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "player {} timed out waiting for {count} pieces (have {})",
                self.player(),
                board.piece_count()
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}
