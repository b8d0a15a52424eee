// TCP client for connecting to the relay.
//
// Both client types share the same plumbing:
// - `handshake()` connects and reads the first line on the calling thread:
//   the assigned player number, or `FULL`. Any bytes that arrived after the
//   handshake line stay in the `LineBuffer` and are replayed by the reader.
// - `reader_loop()` runs on a background thread, splits incoming bytes into
//   lines, decodes them into `Inbound` envelopes, and hands each one to a
//   callback. An unterminated fragment left at EOF is decoded too, so a
//   peer that writes `SERVER_SHUTDOWN` without a newline and hangs up is
//   still understood.
// - Writes happen on the caller's thread, one `write_line` per envelope.
//
// `NetClient` is the thin transport: the callback queues envelopes on an
// `mpsc` channel and `poll()` drains them without blocking.
//
// `GameClient` is what a front-end uses: the reader thread applies each
// envelope to a shared `TurnState` + `Board` as soon as it arrives, and the
// render loop reads `snapshot()` on its own schedule. Neither side ever
// blocks on network reads.

use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use connect4_protocol::{
    ClientMessage, Handshake, Inbound, LineBuffer, PlayerNumber, READ_CHUNK, Vote,
    decode_handshake, decode_server_line, encode, write_line,
};
use log::{debug, warn};

use crate::error::ClientError;
use crate::turn_state::{Applied, Board, TurnState};

/// How long `connect` waits for the player number.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw transport to the relay.
pub struct NetClient {
    writer: TcpStream,
    inbox: Receiver<Inbound>,
    player: PlayerNumber,
    reader_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect, read the player number, and start the reader thread.
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let (stream, player, buffer) = handshake(addr)?;
        let reader = stream.try_clone()?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            // Stop once the owner dropped the receiver.
            reader_loop(&reader, buffer, |inbound| tx.send(inbound).is_ok());
        });

        Ok(Self {
            writer: stream,
            inbox: rx,
            player,
            reader_thread: Some(reader_thread),
        })
    }

    pub fn player(&self) -> PlayerNumber {
        self.player
    }

    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        send_msg(&mut self.writer, msg)
    }

    /// Send a move in `column` using this player's piece.
    pub fn send_move(&mut self, column: i32) -> Result<(), ClientError> {
        let piece = self.player.piece();
        self.send(&ClientMessage::Move { column, piece })
    }

    pub fn send_vote(&mut self, vote: Vote) -> Result<(), ClientError> {
        self.send(&ClientMessage::Restart { vote })
    }

    pub fn send_reset_confirm(&mut self) -> Result<(), ClientError> {
        let player = Some(self.player);
        self.send(&ClientMessage::ResetConfirm { player })
    }

    /// Drain all queued envelopes (non-blocking).
    pub fn poll(&self) -> Vec<Inbound> {
        self.inbox.try_iter().collect()
    }

    /// Take the oldest queued envelope, if any (non-blocking).
    pub fn poll_next(&self) -> Option<Inbound> {
        self.inbox.try_recv().ok()
    }

    /// Close the connection and wait for the reader thread, which exits on
    /// the resulting EOF. Envelopes it queued before that stay pollable.
    pub fn disconnect(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
        join_reader(&mut self.reader_thread);
    }
}

struct Shared<B> {
    turn: TurnState,
    board: B,
}

fn lock<B>(shared: &Mutex<Shared<B>>) -> MutexGuard<'_, Shared<B>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Game client for a front-end: owns the board and keeps the turn state in
/// step with the relay from a background thread.
pub struct GameClient<B> {
    writer: TcpStream,
    shared: Arc<Mutex<Shared<B>>>,
    player: PlayerNumber,
    reader_thread: Option<JoinHandle<()>>,
}

impl<B: Board + Send + 'static> GameClient<B> {
    /// Connect with a fresh `board`.
    pub fn connect(addr: &str, board: B) -> Result<Self, ClientError> {
        let (stream, player, buffer) = handshake(addr)?;
        let reader = stream.try_clone()?;

        let shared = Arc::new(Mutex::new(Shared {
            turn: TurnState::new(player),
            board,
        }));
        let reader_shared = Arc::clone(&shared);
        let reader_thread = thread::spawn(move || {
            reader_loop(&reader, buffer, |inbound| {
                let mut guard = lock(&reader_shared);
                let Shared { turn, board } = &mut *guard;
                turn.apply(&inbound, board) == Applied::Continue
            });
            // The pairing is over (or the relay went away): close our end.
            let _ = reader.shutdown(Shutdown::Both);
        });

        Ok(Self {
            writer: stream,
            shared,
            player,
            reader_thread: Some(reader_thread),
        })
    }

    pub fn player(&self) -> PlayerNumber {
        self.player
    }

    /// Drop this player's piece into `column` and send the move. Fails
    /// without sending anything if it is not this player's turn or the
    /// column is full.
    pub fn play_column(&mut self, column: i32) -> Result<(), ClientError> {
        let mut guard = lock(&self.shared);
        let Shared { turn, board } = &mut *guard;
        turn.play_local(column, board)?;
        let piece = self.player.piece();
        send_msg(&mut self.writer, &ClientMessage::Move { column, piece })
    }

    /// Cast this player's restart ballot.
    pub fn vote(&mut self, vote: Vote) -> Result<(), ClientError> {
        let mut guard = lock(&self.shared);
        guard.turn.cast_vote(vote)?;
        send_msg(&mut self.writer, &ClientMessage::Restart { vote })
    }

    /// Copy of the current turn state, for rendering.
    pub fn snapshot(&self) -> TurnState {
        lock(&self.shared).turn.clone()
    }

    /// Read the board without copying it.
    pub fn with_board<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&lock(&self.shared).board)
    }

    /// Close the connection and wait for the reader thread to finish.
    pub fn disconnect(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
        join_reader(&mut self.reader_thread);
    }
}

/// Connect and read the handshake line. Returns the stream (with its read
/// timeout cleared), the assigned number, and any bytes read past the
/// handshake.
fn handshake(addr: &str) -> Result<(TcpStream, PlayerNumber, LineBuffer), ClientError> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut reader = &stream;
    let line = loop {
        if let Some(frame) = buffer.next_line() {
            break frame.map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            // The relay may close right after an unterminated line.
            match buffer.take_remainder() {
                Some(line) => break line,
                None => return Err(ClientError::ClosedDuringHandshake),
            }
        }
        buffer.extend(&chunk[..n]);
    };

    match decode_handshake(&line)? {
        Handshake::Assigned(player) => {
            stream.set_read_timeout(None)?;
            debug!("assigned player {player}");
            Ok((stream, player, buffer))
        }
        Handshake::Full => Err(ClientError::SessionFull),
    }
}

/// Read envelopes until EOF, a read error, or `on_inbound` returns `false`.
fn reader_loop<F>(stream: &TcpStream, mut buffer: LineBuffer, mut on_inbound: F)
where
    F: FnMut(Inbound) -> bool,
{
    let mut reader = stream;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        while let Some(frame) = buffer.next_line() {
            let keep_going = match frame {
                Ok(line) => deliver(&line, &mut on_inbound),
                Err(e) => {
                    warn!("{e}");
                    true
                }
            };
            if !keep_going {
                return;
            }
        }

        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("read failed: {e}");
                break;
            }
        }
    }

    if let Some(rest) = buffer.take_remainder() {
        deliver(&rest, &mut on_inbound);
    }
}

/// Decode one line and pass it on. Malformed lines are logged and skipped.
fn deliver<F>(line: &[u8], on_inbound: &mut F) -> bool
where
    F: FnMut(Inbound) -> bool,
{
    match decode_server_line(line) {
        Ok(inbound) => on_inbound(inbound),
        Err(e) => {
            warn!(
                "dropping line {:?}: {e}",
                String::from_utf8_lossy(line)
            );
            true
        }
    }
}

/// Join the reader thread if it is still attached. Later calls do nothing.
fn join_reader(reader_thread: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = reader_thread.take() {
        if handle.join().is_err() {
            warn!("reader thread panicked");
        }
    }
}

/// Serialize a `ClientMessage` to JSON and write it as one line.
fn send_msg(writer: &mut TcpStream, msg: &ClientMessage) -> Result<(), ClientError> {
    let json = encode(msg)?;
    write_line(writer, &json)?;
    Ok(())
}
