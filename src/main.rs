//! Main application entry point and high-level flow coordination.
//!
//! Parses the command line, installs the logging sink and hands over to the
//! library:
//! - `run`: [`Daemon`] owns the daemon lifecycle
//! - `status`: resolves the configured user once and prints the snapshot
//! - `check`: evaluates a window against the current local time

use anyhow::{Context, Result};

use appearanced::args::{self, CliAction, GlobalOptions, ParsedArgs};
use appearanced::common::constants::{EXIT_FAILURE, EXIT_SUCCESS};
use appearanced::common::logger::{Log, LoggerGuard};
use appearanced::config::{self, Config};
use appearanced::daemon::{Daemon, status_snapshot};
use appearanced::schedule::window::{format_minutes, is_within_time_interval, parse_minutes};
use appearanced::time_source::{Clock, SystemClock};
use appearanced::{log_block_start, log_end, log_error_exit, log_indented, log_pipe};

fn main() {
    let parsed = ParsedArgs::from_env();

    let code = match parsed.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            EXIT_SUCCESS
        }
        CliAction::ShowHelp => {
            args::display_help();
            EXIT_SUCCESS
        }
        CliAction::ShowHelpDueToError(message) => {
            log_pipe!();
            log_error_exit!("{message}");
            args::display_help();
            EXIT_FAILURE
        }
        CliAction::Run(options) => report(run(options)),
        CliAction::Status(options) => report(status(options)),
        CliAction::Check {
            options,
            start,
            end,
        } => report(check(options, &start, &end)),
    };

    std::process::exit(code);
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            log_error_exit!("{e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            EXIT_FAILURE
        }
    }
}

/// Apply the global flags. The guard must outlive all logging.
fn prepare(options: &GlobalOptions) -> Result<Option<LoggerGuard>> {
    Log::set_debug(options.debug_enabled);
    config::set_config_dir(options.config_dir.clone())?;

    match &options.log_file {
        Some(path) => {
            let guard = Log::start_file_logging(path.clone())
                .with_context(|| format!("Failed to start logging to {path}"))?;
            Log::set_timestamps(true);
            Ok(Some(guard))
        }
        None => Ok(None),
    }
}

fn run(options: GlobalOptions) -> Result<()> {
    let _log_guard = prepare(&options)?;
    Daemon::new(options.debug_enabled).run()
}

fn status(options: GlobalOptions) -> Result<()> {
    let _log_guard = prepare(&options)?;
    // Keep stdout clean for the JSON
    if options.log_file.is_none() {
        Log::set_enabled(false);
    }

    let config = Config::load()?;
    let snapshot = status_snapshot(&config)?;
    let json =
        serde_json::to_string_pretty(&snapshot).context("Failed to encode state snapshot")?;
    println!("{json}");
    Ok(())
}

fn check(options: GlobalOptions, start: &str, end: &str) -> Result<()> {
    let _log_guard = prepare(&options)?;
    let start = parse_minutes(start).with_context(|| format!("Invalid start time '{start}'"))?;
    let end = parse_minutes(end).with_context(|| format!("Invalid end time '{end}'"))?;

    let now = SystemClock.now();
    let inside = is_within_time_interval(start, end, &now);

    log_block_start!(
        "Window {} → {}",
        format_minutes(start),
        format_minutes(end)
    );
    log_indented!("Now: {}", now.format("%H:%M"));
    log_indented!(
        "Status: {}",
        if inside { "inside (dark)" } else { "outside (light)" }
    );
    log_end!();
    Ok(())
}
