//! Unix signal handling for the daemon.
//!
//! A dedicated thread turns signals into [`SignalMessage`]s on a channel the
//! daemon loop drains. The same channel carries the system event monitors'
//! messages (see [`super::dbus`]).

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR2},
    iterator::Signals,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Unified message type for everything the daemon loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// SIGTERM, SIGINT or SIGHUP
    Shutdown,
    /// SIGUSR2: re-arm timers from their stored windows
    RestartTimers,
    /// The wall clock was set
    TimeChange,
    /// Going to sleep or resuming
    Sleep { resuming: bool },
}

/// Signal handling state shared between threads
pub struct SignalState {
    /// Cleared once a shutdown was requested
    pub running: Arc<AtomicBool>,
    pub signal_receiver: Receiver<SignalMessage>,
    /// For the system event monitors
    pub signal_sender: Sender<SignalMessage>,
}

/// Install handlers and spawn the thread forwarding signals to the channel.
pub fn setup_signal_handler(debug_enabled: bool) -> Result<SignalState> {
    let running = Arc::new(AtomicBool::new(true));
    let (signal_sender, signal_receiver) = std::sync::mpsc::channel::<SignalMessage>();

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR2])
        .context("failed to register signal handlers")?;

    let running_clone = running.clone();
    let sender = signal_sender.clone();

    thread::Builder::new()
        .name("appearanced-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let message = match sig {
                    SIGUSR2 => {
                        log_pipe!();
                        log_info!("Received timer restart signal");
                        SignalMessage::RestartTimers
                    }
                    SIGINT => {
                        log_pipe!();
                        if debug_enabled {
                            log_info!("Received SIGINT (Ctrl+C), shutting down...");
                        } else {
                            log_info!("Received interrupt signal, shutting down...");
                        }
                        SignalMessage::Shutdown
                    }
                    SIGTERM => {
                        log_pipe!();
                        log_info!("Received termination request, shutting down...");
                        SignalMessage::Shutdown
                    }
                    SIGHUP => {
                        log_pipe!();
                        log_info!("Received hangup signal, shutting down...");
                        SignalMessage::Shutdown
                    }
                    _ => continue,
                };

                let shutdown = message == SignalMessage::Shutdown;
                if shutdown {
                    running_clone.store(false, Ordering::SeqCst);
                }
                if sender.send(message).is_err() || shutdown {
                    break;
                }
            }
        })
        .context("failed to spawn signal handler thread")?;

    Ok(SignalState {
        running,
        signal_receiver,
        signal_sender,
    })
}
