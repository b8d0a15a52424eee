// TCP listener and per-connection threads for the relay.
//
// Architecture: thread-per-connection around a shared `SessionHandle`.
//
// - **Listener thread**: owns the `TcpListener`, set non-blocking so the
//   loop can re-check `running` every `accept_poll` interval. Each accepted
//   stream is offered to the session; admitted ones get a connection thread.
// - **Connection threads** (one per player): blocking reads of up to
//   `READ_CHUNK` bytes into a `LineBuffer`, decode each complete line, and
//   call the matching `SessionHandle` mutator. Reads never hold the lock.
//   A malformed line is logged and dropped; EOF or a read error removes the
//   player and ends the thread.
// - **Shutdown**: `RelayHandle::shutdown` sends `SERVER_SHUTDOWN` to every
//   player, waits `shutdown_grace`, then closes every socket. Closing a
//   socket wakes its blocked reader with EOF, and the listener thread sees
//   `running == false` on its next pass and drops the listening socket.
//
// The relay never validates moves and never tells a player that the other
// one left. Both are deliberate; see `session.rs`.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use connect4_protocol::{ClientMessage, LineBuffer, PlayerNumber, READ_CHUNK, decode_client_line};
use log::{debug, error, info, warn};

use crate::error::RelayError;
use crate::session::{Admission, ConnectionId, SessionHandle};

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    /// Port to bind. `0` lets the OS pick one; `start_relay` returns the
    /// actual address.
    pub port: u16,
    /// How often the accept loop re-checks for shutdown when idle.
    pub accept_poll: Duration,
    /// Time between the shutdown notice and closing the sockets.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            accept_poll: Duration::from_millis(500),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Handle returned by `start_relay` to observe and stop the running server.
pub struct RelayHandle {
    session: SessionHandle,
    shutdown_grace: Duration,
    listener_thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Notify players, wait out the grace period, and close every
    /// connection. Safe to call more than once; later calls do nothing.
    pub fn shutdown(&self) {
        if self.session.shutdown(self.shutdown_grace) {
            info!("relay shut down");
        }
    }

    /// Shut down and wait for the listener thread to release its socket.
    pub fn stop(mut self) {
        self.shutdown();
        if let Some(handle) = self.listener_thread.take() {
            if handle.join().is_err() {
                error!("listener thread panicked");
            }
        }
    }

    /// The shared session, for inspection.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

/// Bind the listener and start accepting players on a background thread.
/// Returns a handle for stopping the relay and the bound address.
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).map_err(|source| RelayError::Bind {
        addr: addr.clone(),
        source,
    })?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("relay listening on {local_addr}");

    let session = SessionHandle::new();
    let accept_session = session.clone();
    let poll = config.accept_poll;
    let listener_thread = thread::spawn(move || {
        accept_loop(listener, accept_session, poll);
    });

    Ok((
        RelayHandle {
            session,
            shutdown_grace: config.shutdown_grace,
            listener_thread: Some(listener_thread),
        },
        local_addr,
    ))
}

/// Accept connections until the session stops running. The listener is
/// dropped (closed) when this returns.
fn accept_loop(listener: TcpListener, session: SessionHandle, poll: Duration) {
    while session.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("connection from {peer}");
                admit(&session, stream, peer);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(poll);
            }
            Err(e) => {
                if session.is_running() {
                    warn!("accept failed: {e}");
                }
                thread::sleep(poll);
            }
        }
    }
    info!("listener closed");
}

/// Offer a fresh connection to the session and spawn its reader thread.
fn admit(session: &SessionHandle, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("{peer}: cannot switch to blocking mode: {e}");
        return;
    }
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            warn!("{peer}: cannot clone stream: {e}");
            return;
        }
    };

    let handler_session = session.clone();
    let admission = session.admit(stream, move |id, player| {
        thread::spawn(move || {
            connection_loop(reader, id, player, handler_session);
        });
    });

    match admission {
        Admission::Admitted { player, .. } => info!("{peer} admitted as player {player}"),
        Admission::Full => info!("{peer} rejected: session full"),
        Admission::Closed => debug!("{peer} dropped: shutting down"),
    }
}

/// Read loop for one player. Runs in its own thread.
fn connection_loop(
    mut stream: TcpStream,
    id: ConnectionId,
    player: PlayerNumber,
    session: SessionHandle,
) {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => {
                debug!("player {player}: connection closed");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("player {player}: read failed: {e}");
                break;
            }
        };

        buffer.extend(&chunk[..n]);
        while let Some(frame) = buffer.next_line() {
            // Nothing is relayed once SERVER_SHUTDOWN has gone out.
            if !session.is_running() {
                debug!("player {player}: dropping input during shutdown");
                break;
            }
            match frame {
                Ok(line) => dispatch(&session, id, player, &line),
                Err(e) => warn!("player {player}: {e}"),
            }
        }

        if !session.is_running() {
            break;
        }
    }

    session.remove_player(id);
}

/// Decode one line from a player and hand it to the session.
fn dispatch(session: &SessionHandle, id: ConnectionId, player: PlayerNumber, line: &[u8]) {
    let message = match decode_client_line(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "player {player}: dropping line {:?}: {e}",
                String::from_utf8_lossy(line)
            );
            return;
        }
    };

    match message {
        ClientMessage::Move { column, piece } => {
            session.relay_move(id, column, piece);
        }
        ClientMessage::Restart { vote } => {
            session.record_vote(id, vote);
        }
        ClientMessage::ResetConfirm { .. } => {
            // game_start already went out with the YES reset.
            debug!("player {player}: reset confirmed");
        }
    }
}
