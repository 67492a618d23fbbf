//! Structured logging with visual block formatting.
//!
//! The daemon logs as a continuous pipe-decorated stream so that related lines
//! (a settings change, the schedule it produced, the notification it caused)
//! read as one block:
//!
//! ```text
//! ┏ appearanced v0.4.0 ━━╸
//! ┃
//! ┣ Switching active user to 100
//! ┃   mode: custom window (22:00 → 06:00)
//! ┣[INFO] Dark mode resolved to dark
//! ```
//!
//! ## Conventions
//!
//! - **`log_block_start!`** opens a new conceptual block (prepends an empty `┃`).
//! - **`log_decorated!`** continues a block with `┣ message`.
//! - **`log_indented!`** prints nested detail as `┃   message`.
//! - **`log_pipe!`** inserts an empty `┃` line, used before a semantic
//!   `log_info!`/`log_warning!`/`log_error!` that starts its own block.
//! - **`log_debug!`** is only emitted when debug output is enabled.
//! - **`log_version!`** / **`log_end!`** bracket the daemon's lifetime.
//!
//! Output goes to stdout unless [`Log::start_file_logging`] routed it to a file,
//! in which case a background thread writes ANSI-stripped lines.

use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static TIMESTAMPS_ENABLED: AtomicBool = AtomicBool::new(false);

// Channel for routing output to a file when --log is active
static LOG_CHANNEL: OnceLock<Sender<LogMessage>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Global logging switches shared by every macro.
pub struct Log;

impl Log {
    /// Enable or disable all output (tests and `status` run quiet).
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Enable `log_debug!` output.
    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }

    /// Prefix every line with a local wall-clock timestamp.
    pub fn set_timestamps(enabled: bool) {
        TIMESTAMPS_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Start file logging to the specified path.
    ///
    /// Can only be installed once per process; the returned guard flushes and
    /// joins the writer thread when dropped.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(tx.clone())
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::spawn(move || {
            let mut file = std::fs::File::create(&file_path)?;

            loop {
                match rx.recv() {
                    Ok(LogMessage::Formatted(text)) => {
                        file.write_all(text.as_bytes())?;
                    }
                    Ok(LogMessage::Shutdown) | Err(_) => {
                        file.flush()?;
                        break;
                    }
                }
            }

            Ok::<(), anyhow::Error>(())
        });

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Timestamp prefix for the current line, empty unless enabled.
    pub fn timestamp_prefix() -> String {
        if TIMESTAMPS_ENABLED.load(Ordering::SeqCst) {
            format!("[{}] ", chrono::Local::now().format("%H:%M:%S"))
        } else {
            String::new()
        }
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Route one formatted line to the active sink. Public for macro access.
pub fn write_output(text: &str) {
    if let Some(tx) = LOG_CHANNEL.get() {
        let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(text)));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Format and emit one line with the given decoration. Public for macro access.
pub fn emit(decoration: &str, message: std::fmt::Arguments<'_>) {
    if !Log::is_enabled() {
        return;
    }
    let prefix = Log::timestamp_prefix();
    write_output(&format!("{prefix}{decoration}{message}\n"));
}

// # Logging Macros

/// Log a decorated message as part of an existing block.
#[macro_export]
macro_rules! log_decorated {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┣ ", format_args!($($arg)*))
    };
}

/// Log an indented detail line within a block.
#[macro_export]
macro_rules! log_indented {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┃   ", format_args!($($arg)*))
    };
}

/// Log a visual pipe separator for vertical spacing.
#[macro_export]
macro_rules! log_pipe {
    () => {
        $crate::common::logger::emit("┃", format_args!(""))
    };
}

/// Start a new conceptual block.
#[macro_export]
macro_rules! log_block_start {
    ($($arg:tt)*) => {{
        $crate::log_pipe!();
        $crate::common::logger::emit("┣ ", format_args!($($arg)*));
    }};
}

/// Log the daemon version header.
#[macro_export]
macro_rules! log_version {
    () => {
        $crate::common::logger::emit(
            "┏ ",
            format_args!("appearanced v{} ━━╸", env!("CARGO_PKG_VERSION")),
        )
    };
}

/// Log the final termination marker.
#[macro_export]
macro_rules! log_end {
    () => {
        $crate::common::logger::emit("╹", format_args!(""))
    };
}

/// Log an informational message in green.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┣[\x1b[32mINFO\x1b[0m] ", format_args!($($arg)*))
    };
}

/// Log a warning message in yellow.
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┣[\x1b[33mWARNING\x1b[0m] ", format_args!($($arg)*))
    };
}

/// Log an error message in red.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┣[\x1b[31mERROR\x1b[0m] ", format_args!($($arg)*))
    };
}

/// Log an error that terminates the current flow.
#[macro_export]
macro_rules! log_error_exit {
    ($($arg:tt)*) => {{
        $crate::log_pipe!();
        $crate::common::logger::emit("┗[\x1b[31mERROR\x1b[0m] ", format_args!($($arg)*));
    }};
}

/// Log a critical message in red.
#[macro_export]
macro_rules! log_critical {
    ($($arg:tt)*) => {
        $crate::common::logger::emit("┣[\x1b[31mCRITICAL\x1b[0m] ", format_args!($($arg)*))
    };
}

/// Log a debug message, only when debug output is enabled.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::common::logger::Log::is_debug() {
            $crate::common::logger::emit("┣[\x1b[32mDEBUG\x1b[0m] ", format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_strip_ansi_codes() {
        assert_eq!(strip_ansi_codes("┣[\x1b[32mINFO\x1b[0m] ok"), "┣[INFO] ok");
        assert_eq!(strip_ansi_codes("plain"), "plain");
        assert_eq!(strip_ansi_codes("lone \x1b escape"), "lone \x1b escape");
    }

    #[test]
    #[serial]
    fn test_debug_gate_toggles() {
        Log::set_debug(true);
        assert!(Log::is_debug());
        Log::set_debug(false);
        assert!(!Log::is_debug());
    }

    #[test]
    #[serial]
    fn test_timestamp_prefix_only_when_enabled() {
        Log::set_timestamps(false);
        assert!(Log::timestamp_prefix().is_empty());
        Log::set_timestamps(true);
        assert!(Log::timestamp_prefix().starts_with('['));
        Log::set_timestamps(false);
    }
}
