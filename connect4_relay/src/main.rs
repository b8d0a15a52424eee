// CLI entry point for the Connect Four relay.
//
// Starts a standalone relay that two game clients connect to. The relay
// numbers the players, forwards moves, and runs the restart vote; it never
// runs game logic. See `server.rs` for the networking architecture and
// `session.rs` for the session state.
//
// Usage:
//   relay [OPTIONS]
//     --host <HOST>         Bind address (default: 127.0.0.1)
//     --port <PORT>         Listen port (default: 5000)
//     --poll-ms <MS>        Accept-loop shutdown poll interval (default: 500)
//     --grace-ms <MS>       Delay between shutdown notice and close (default: 500)
//     --log-level <LEVEL>   Log filter when RUST_LOG is unset (default: info)
//
// Operator control: type `quit` on stdin, or press Ctrl+C. Both run the
// same shutdown path.

use std::io::BufRead;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use connect4_relay::server::{RelayConfig, start_relay};
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Two-player Connect Four session relay")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Milliseconds between accept-loop checks for shutdown.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Milliseconds to wait after the shutdown notice before closing sockets.
    #[arg(long, default_value_t = 500)]
    grace_ms: u64,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            port: self.port,
            accept_poll: Duration::from_millis(self.poll_ms),
            shutdown_grace: Duration::from_millis(self.grace_ms),
        }
    }
}

/// Why the operator asked the relay to stop.
#[derive(Debug)]
enum Control {
    Quit,
    Interrupt,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let (handle, addr) = match start_relay(args.relay_config()) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start relay: {e}");
            std::process::exit(1);
        }
    };
    info!("relay ready on {addr}; type `quit` or press Ctrl+C to stop");

    let (tx, rx) = mpsc::channel();

    let interrupt_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Control::Interrupt);
    }) {
        warn!("cannot install Ctrl+C handler: {e}");
    }

    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim().to_ascii_lowercase().as_str() {
                "quit" => {
                    let _ = tx.send(Control::Quit);
                    break;
                }
                "" => {}
                other => warn!("unknown command: {other}"),
            }
        }
    });

    // Stdin EOF just ends the command thread; Ctrl+C still works. The
    // receive only fails if every sender is gone.
    match rx.recv() {
        Ok(reason) => info!("stopping relay ({reason:?})"),
        Err(_) => info!("control channel closed, stopping relay"),
    }
    handle.stop();
}
