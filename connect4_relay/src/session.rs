// Session state for the relay.
//
// `Session` is the single authoritative record for one game instance: the
// connected players (at most two, in admission order), the restart-vote
// round, who moves first in the next round, and whether the relay is still
// running. It is shared by the accept loop and every connection thread
// through `SessionHandle`, which wraps it in one `Mutex`.
//
// Every mutator that changes state also performs the broadcast that goes
// with the change, inside the same lock acquisition. Two consequences:
// - writes to the two sockets are serialized, so `vote_status`, `reset` and
//   `game_start` for one round always arrive in that order, and a relayed
//   move can never interleave with them;
// - a slow peer stalls broadcasts to the other peer. With two players that
//   is acceptable.
//
// Writing to client streams: each player slot holds the write half of its
// `TcpStream`. Write errors are logged and otherwise ignored; the reader
// thread for that connection will see the broken socket and remove it.
//
// Known gaps kept on purpose: moves are never validated (the relay trusts
// the clients), the remaining peer is not told when the other disconnects,
// and a player leaving mid-vote stalls the round forever. A leaving
// player's own ballot is withdrawn, so it never counts toward a later
// pairing.

use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use connect4_protocol::{
    PlayerNumber, ServerMessage, Signal, Vote, VoteTally, encode, encode_handshake, write_line,
};
use log::{debug, info, warn};

use crate::vote::{VoteOutcome, VoteRound};

/// Maximum number of players in one session.
pub const MAX_PLAYERS: usize = 2;

/// Internal identity of an accepted connection. Never reused within one
/// relay process, unlike `PlayerNumber`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Result of offering a new connection to the session.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        id: ConnectionId,
        player: PlayerNumber,
    },
    /// Two players are already connected. `FULL` was sent and the socket closed.
    Full,
    /// Shutdown has begun. The socket was closed without a reply.
    Closed,
}

struct PlayerSlot {
    id: ConnectionId,
    number: PlayerNumber,
    stream: TcpStream,
}

pub struct Session {
    players: Vec<PlayerSlot>,
    votes: VoteRound,
    first_player: PlayerNumber,
    running: bool,
    next_connection_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            players: Vec::with_capacity(MAX_PLAYERS),
            votes: VoteRound::new(),
            first_player: PlayerNumber::ONE,
            running: true,
            next_connection_id: 0,
        }
    }

    /// Admit `stream` if there is room. The player number is the roster
    /// length after the append and is written to the stream as its first
    /// line.
    pub fn admit(&mut self, mut stream: TcpStream) -> Admission {
        if !self.running {
            let _ = stream.shutdown(Shutdown::Both);
            return Admission::Closed;
        }
        if self.players.len() >= MAX_PLAYERS {
            if let Err(e) = write_line(&mut stream, Signal::Full.as_bytes()) {
                debug!("failed to send FULL: {e}");
            }
            let _ = stream.shutdown(Shutdown::Both);
            return Admission::Full;
        }

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        let number = PlayerNumber(u8::try_from(self.players.len() + 1).unwrap_or(u8::MAX));

        if let Err(e) = write_line(&mut stream, &encode_handshake(number)) {
            warn!("player {number}: failed to send player number: {e}");
        }
        self.players.push(PlayerSlot { id, number, stream });
        info!("player {number} joined ({} connected)", self.players.len());

        Admission::Admitted { id, player: number }
    }

    /// Forward a move to every player except the sender. Returns how many
    /// players it was sent to.
    pub fn relay_move(&mut self, from: ConnectionId, column: i32, piece: i32) -> usize {
        let msg = ServerMessage::Move { column, piece };
        let Some(line) = encode_or_log(&msg) else {
            return 0;
        };
        let mut sent = 0;
        for slot in self.players.iter_mut().filter(|slot| slot.id != from) {
            send_line(slot, &line);
            sent += 1;
        }
        debug!("relayed move column={column} piece={piece} to {sent} player(s)");
        sent
    }

    /// Count a restart ballot and broadcast the consequences: always the
    /// tally, then `reset` once the round is decided, then `game_start` when
    /// the result is YES.
    pub fn record_vote(&mut self, from: ConnectionId, vote: Vote) -> VoteOutcome {
        let outcome = self.votes.cast(from, vote);
        match outcome {
            VoteOutcome::Duplicate(_) => {
                warn!("connection {}: ignoring second vote in this round", from.0);
            }
            VoteOutcome::Pending(tally) => {
                info!("vote {vote} recorded: {tally:?}");
                self.broadcast(&ServerMessage::VoteStatus { votes: tally });
            }
            VoteOutcome::Decided { tally, result } => {
                info!("vote {vote} recorded: {tally:?}, result {result}");
                self.broadcast(&ServerMessage::VoteStatus { votes: tally });
                self.broadcast(&ServerMessage::Reset { result });
                if result == Vote::Yes {
                    self.start_next_round();
                }
            }
        }
        outcome
    }

    /// Flip the first player and tell both clients to start over.
    fn start_next_round(&mut self) {
        self.first_player = self.first_player.other();
        self.votes.clear();
        info!("new round, player {} moves first", self.first_player);
        self.broadcast(&ServerMessage::GameStart {
            turn: self.first_player.turn_index(),
            first_player: self.first_player,
        });
    }

    /// Drop a connection from the roster and close its socket. Returns the
    /// player number it held, or `None` if it was already gone.
    pub fn remove_player(&mut self, id: ConnectionId) -> Option<PlayerNumber> {
        let index = self.players.iter().position(|slot| slot.id == id)?;
        let slot = self.players.remove(index);
        let _ = slot.stream.shutdown(Shutdown::Both);
        if let Some(vote) = self.votes.withdraw(id) {
            debug!("player {}: withdrew {vote} ballot", slot.number);
        }
        info!(
            "player {} left ({} connected)",
            slot.number,
            self.players.len()
        );
        Some(slot.number)
    }

    /// First half of shutdown: stop accepting work and tell every player.
    /// Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        for slot in &mut self.players {
            send_line(slot, Signal::ServerShutdown.as_bytes());
        }
        true
    }

    /// Second half of shutdown: close every connection.
    pub fn close_all(&mut self) {
        for slot in self.players.drain(..) {
            let _ = slot.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Player numbers in admission order.
    pub fn player_numbers(&self) -> Vec<PlayerNumber> {
        self.players.iter().map(|slot| slot.number).collect()
    }

    pub fn first_player(&self) -> PlayerNumber {
        self.first_player
    }

    pub fn votes(&self) -> VoteTally {
        self.votes.tally()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        let Some(line) = encode_or_log(msg) else {
            return;
        };
        for slot in &mut self.players {
            send_line(slot, &line);
        }
    }
}

fn encode_or_log(msg: &ServerMessage) -> Option<Vec<u8>> {
    match encode(msg) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!("failed to encode {msg:?}: {e}");
            None
        }
    }
}

/// Best-effort write of one line to a player.
fn send_line(slot: &mut PlayerSlot, line: &[u8]) {
    if let Err(e) = write_line(&mut slot.stream, line) {
        debug!("player {}: write failed: {e}", slot.number);
    }
}

/// Shared, lock-protected session. Cloning is cheap; every clone refers to
/// the same session.
///
/// Each method takes the lock exactly once, so a state change and its
/// broadcast are never split across two acquisitions.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session. A poisoned lock is recovered: the state is plain
    /// data and stays consistent between statements.
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a connection. `on_admitted` runs while the lock is still held,
    /// so the connection thread exists before any other thread can broadcast
    /// to the new player or remove it.
    pub fn admit<F>(&self, stream: TcpStream, on_admitted: F) -> Admission
    where
        F: FnOnce(ConnectionId, PlayerNumber),
    {
        let mut session = self.lock();
        let admission = session.admit(stream);
        if let Admission::Admitted { id, player } = admission {
            on_admitted(id, player);
        }
        admission
    }

    pub fn relay_move(&self, from: ConnectionId, column: i32, piece: i32) -> usize {
        self.lock().relay_move(from, column, piece)
    }

    pub fn record_vote(&self, from: ConnectionId, vote: Vote) -> VoteOutcome {
        self.lock().record_vote(from, vote)
    }

    pub fn remove_player(&self, id: ConnectionId) -> Option<PlayerNumber> {
        self.lock().remove_player(id)
    }

    /// Notify every player, wait `grace` for the notice to land, then close
    /// every connection. Returns `false` without doing anything if shutdown
    /// already ran.
    pub fn shutdown(&self, grace: Duration) -> bool {
        if !self.lock().begin_shutdown() {
            return false;
        }
        info!("shutdown notice sent, closing connections in {grace:?}");
        thread::sleep(grace);
        self.lock().close_all();
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    pub fn player_count(&self) -> usize {
        self.lock().player_count()
    }

    pub fn player_numbers(&self) -> Vec<PlayerNumber> {
        self.lock().player_numbers()
    }

    pub fn first_player(&self) -> PlayerNumber {
        self.lock().first_player()
    }

    pub fn votes(&self) -> VoteTally {
        self.lock().votes()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, ErrorKind, Read};
    use std::net::TcpListener;

    use connect4_protocol::{Inbound, decode_server_line};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn reader(client: TcpStream) -> BufReader<TcpStream> {
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        BufReader::new(client)
    }

    fn recv_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn recv_msg(reader: &mut BufReader<TcpStream>) -> ServerMessage {
        match decode_server_line(recv_line(reader).as_bytes()).unwrap() {
            Inbound::Message(msg) => msg,
            other => panic!("expected a JSON message, got {other:?}"),
        }
    }

    /// Assert nothing is waiting on the stream.
    fn assert_silent(reader: &mut BufReader<TcpStream>) {
        assert!(reader.buffer().is_empty());
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut byte = [0u8; 1];
        let err = reader.get_mut().read(&mut byte).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::WouldBlock | ErrorKind::TimedOut
        ));
    }

    /// Session with two admitted players; handshake lines already drained.
    fn two_player_session() -> (
        Session,
        (ConnectionId, BufReader<TcpStream>),
        (ConnectionId, BufReader<TcpStream>),
    ) {
        let mut session = Session::new();
        let (client1, server1) = tcp_pair();
        let (client2, server2) = tcp_pair();
        let Admission::Admitted { id: id1, .. } = session.admit(server1) else {
            panic!("first admission failed");
        };
        let Admission::Admitted { id: id2, .. } = session.admit(server2) else {
            panic!("second admission failed");
        };
        let mut reader1 = reader(client1);
        let mut reader2 = reader(client2);
        assert_eq!(recv_line(&mut reader1), "1");
        assert_eq!(recv_line(&mut reader2), "2");
        (session, (id1, reader1), (id2, reader2))
    }

    #[test]
    fn admit_assigns_increasing_numbers_and_sends_them() {
        let mut session = Session::new();
        let (client1, server1) = tcp_pair();
        let (client2, server2) = tcp_pair();

        let first = session.admit(server1);
        let second = session.admit(server2);
        assert!(matches!(
            first,
            Admission::Admitted {
                player: PlayerNumber(1),
                ..
            }
        ));
        assert!(matches!(
            second,
            Admission::Admitted {
                player: PlayerNumber(2),
                ..
            }
        ));
        assert_eq!(session.player_count(), 2);
        assert_eq!(
            session.player_numbers(),
            vec![PlayerNumber::ONE, PlayerNumber::TWO]
        );

        assert_eq!(recv_line(&mut reader(client1)), "1");
        assert_eq!(recv_line(&mut reader(client2)), "2");
    }

    #[test]
    fn third_connection_gets_full_and_is_closed() {
        let (mut session, _p1, _p2) = two_player_session();
        let (client3, server3) = tcp_pair();

        assert_eq!(session.admit(server3), Admission::Full);
        assert_eq!(session.player_count(), 2);

        let mut reader3 = reader(client3);
        assert_eq!(recv_line(&mut reader3), "FULL");
        // Closed: next read is EOF.
        assert_eq!(recv_line(&mut reader3), "");
    }

    #[test]
    fn move_goes_to_the_other_player_only() {
        let (mut session, (id1, mut reader1), (_id2, mut reader2)) = two_player_session();

        assert_eq!(session.relay_move(id1, 3, 1), 1);
        assert_eq!(
            recv_msg(&mut reader2),
            ServerMessage::Move { column: 3, piece: 1 }
        );
        assert_silent(&mut reader1);
    }

    #[test]
    fn move_is_relayed_without_validation() {
        let (mut session, (_id1, mut reader1), (id2, _reader2)) = two_player_session();

        // Out-of-range column, foreign piece, out of turn: relayed anyway.
        assert_eq!(session.relay_move(id2, 99, 7), 1);
        assert_eq!(
            recv_msg(&mut reader1),
            ServerMessage::Move {
                column: 99,
                piece: 7
            }
        );
    }

    #[test]
    fn split_vote_broadcasts_status_then_reset_no() {
        let (mut session, (id1, mut reader1), (id2, mut reader2)) = two_player_session();

        session.record_vote(id1, Vote::Yes);
        session.record_vote(id2, Vote::No);

        for reader in [&mut reader1, &mut reader2] {
            assert_eq!(
                recv_msg(reader),
                ServerMessage::VoteStatus {
                    votes: VoteTally { yes: 1, no: 0 }
                }
            );
            assert_eq!(
                recv_msg(reader),
                ServerMessage::VoteStatus {
                    votes: VoteTally { yes: 1, no: 1 }
                }
            );
            assert_eq!(recv_msg(reader), ServerMessage::Reset { result: Vote::No });
            assert_silent(reader);
        }
        assert_eq!(session.votes(), VoteTally::default());
        assert_eq!(session.first_player(), PlayerNumber::ONE);
        // The relay leaves the sockets open after a NO result.
        assert_eq!(session.player_count(), 2);
    }

    #[test]
    fn unanimous_yes_resets_and_alternates_first_player() {
        let (mut session, (id1, mut reader1), (id2, mut reader2)) = two_player_session();

        session.record_vote(id1, Vote::Yes);
        session.record_vote(id2, Vote::Yes);
        assert_eq!(session.first_player(), PlayerNumber::TWO);
        assert_eq!(session.votes(), VoteTally::default());

        for reader in [&mut reader1, &mut reader2] {
            let _pending = recv_msg(reader);
            assert_eq!(
                recv_msg(reader),
                ServerMessage::VoteStatus {
                    votes: VoteTally { yes: 2, no: 0 }
                }
            );
            assert_eq!(recv_msg(reader), ServerMessage::Reset { result: Vote::Yes });
            assert_eq!(
                recv_msg(reader),
                ServerMessage::GameStart {
                    turn: 1,
                    first_player: PlayerNumber::TWO
                }
            );
        }

        // Next YES round swings back to player 1.
        session.record_vote(id2, Vote::Yes);
        session.record_vote(id1, Vote::Yes);
        assert_eq!(session.first_player(), PlayerNumber::ONE);
        for _ in 0..3 {
            recv_msg(&mut reader1);
        }
        assert_eq!(
            recv_msg(&mut reader1),
            ServerMessage::GameStart {
                turn: 0,
                first_player: PlayerNumber::ONE
            }
        );
    }

    #[test]
    fn no_round_does_not_touch_first_player() {
        let (mut session, (id1, _r1), (id2, _r2)) = two_player_session();
        session.record_vote(id1, Vote::Yes);
        session.record_vote(id2, Vote::Yes);
        assert_eq!(session.first_player(), PlayerNumber::TWO);

        session.record_vote(id1, Vote::No);
        session.record_vote(id2, Vote::No);
        assert_eq!(session.first_player(), PlayerNumber::TWO);
    }

    #[test]
    fn duplicate_vote_is_not_counted_or_broadcast() {
        let (mut session, (id1, mut reader1), (_id2, _reader2)) = two_player_session();

        session.record_vote(id1, Vote::Yes);
        let outcome = session.record_vote(id1, Vote::Yes);
        assert_eq!(
            outcome,
            VoteOutcome::Duplicate(VoteTally { yes: 1, no: 0 })
        );
        assert_eq!(session.votes(), VoteTally { yes: 1, no: 0 });

        let _status = recv_msg(&mut reader1);
        assert_silent(&mut reader1);
    }

    #[test]
    fn remove_player_closes_socket_and_frees_slot() {
        let (mut session, (id1, mut reader1), (_id2, _reader2)) = two_player_session();

        assert_eq!(session.remove_player(id1), Some(PlayerNumber::ONE));
        assert_eq!(session.remove_player(id1), None);
        assert_eq!(session.player_count(), 1);
        assert_eq!(recv_line(&mut reader1), "");

        // The number is the roster length after the append.
        let (client3, server3) = tcp_pair();
        assert!(matches!(
            session.admit(server3),
            Admission::Admitted {
                player: PlayerNumber(2),
                ..
            }
        ));
        assert_eq!(recv_line(&mut reader(client3)), "2");
    }

    #[test]
    fn leaving_voter_takes_its_ballot_along() {
        let (mut session, (id1, _reader1), (id2, _reader2)) = two_player_session();

        session.record_vote(id1, Vote::Yes);
        assert_eq!(session.votes(), VoteTally { yes: 1, no: 0 });
        session.remove_player(id1);
        assert_eq!(session.votes(), VoteTally::default());
        session.remove_player(id2);

        // A fresh pair: one YES alone must not decide the round.
        let (client3, server3) = tcp_pair();
        let (client4, server4) = tcp_pair();
        let Admission::Admitted { id: id3, .. } = session.admit(server3) else {
            panic!("admission failed");
        };
        assert!(matches!(session.admit(server4), Admission::Admitted { .. }));
        let mut reader3 = reader(client3);
        let _reader4 = reader(client4);
        assert_eq!(recv_line(&mut reader3), "1");

        assert_eq!(
            session.record_vote(id3, Vote::Yes),
            VoteOutcome::Pending(VoteTally { yes: 1, no: 0 })
        );
        assert_eq!(session.first_player(), PlayerNumber::ONE);
        assert_eq!(
            recv_msg(&mut reader3),
            ServerMessage::VoteStatus {
                votes: VoteTally { yes: 1, no: 0 }
            }
        );
        assert_silent(&mut reader3);
    }

    #[test]
    fn shutdown_notifies_once_and_closes_everything() {
        let (mut session, (_id1, mut reader1), (_id2, mut reader2)) = two_player_session();

        assert!(session.begin_shutdown());
        assert!(!session.begin_shutdown());
        assert!(!session.is_running());
        session.close_all();
        session.close_all();
        assert_eq!(session.player_count(), 0);

        for reader in [&mut reader1, &mut reader2] {
            assert_eq!(recv_line(reader), "SERVER_SHUTDOWN");
            assert_eq!(recv_line(reader), "");
        }

        let (client3, server3) = tcp_pair();
        assert_eq!(session.admit(server3), Admission::Closed);
        assert_eq!(recv_line(&mut reader(client3)), "");
    }

    #[test]
    fn handle_shutdown_is_idempotent() {
        let handle = SessionHandle::new();
        let (client, server) = tcp_pair();
        let admission = handle.admit(server, |_, _| {});
        assert!(matches!(admission, Admission::Admitted { .. }));

        assert!(handle.shutdown(Duration::from_millis(10)));
        assert!(!handle.shutdown(Duration::from_millis(10)));
        assert_eq!(handle.player_count(), 0);

        let mut client = reader(client);
        assert_eq!(recv_line(&mut client), "1");
        assert_eq!(recv_line(&mut client), "SERVER_SHUTDOWN");
        assert_eq!(recv_line(&mut client), "");
    }
}
