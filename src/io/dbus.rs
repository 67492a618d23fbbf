//! System events that invalidate armed alarms.
//!
//! Alarms are armed for absolute instants. Two things can make them wrong:
//! a suspend that spans a window boundary, and the wall clock being set. Both
//! are watched here and reported on the daemon's signal channel so it can
//! re-arm every timer from its stored window:
//! - logind `PrepareForSleep` over the system bus (zbus, blocking API)
//! - a `CLOCK_REALTIME` timerfd with `TFD_TIMER_CANCEL_ON_SET`

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zbus::blocking::Connection;

use crate::io::signals::SignalMessage;

const MAX_SLEEP_MONITOR_RESTARTS: u8 = 3;
const RESTART_DELAY: Duration = Duration::from_secs(2);
/// Clock jumps this soon after resume belong to the resume itself.
const RESUME_GRACE_SECS: i64 = 5;

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait LogindManager {
    /// `start` is true before suspending and false after resuming.
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Sleep state shared by both monitors, so a resume is not reported twice.
#[derive(Clone, Default)]
struct SleepTracker {
    sleeping: Arc<AtomicBool>,
    resumed_at: Arc<AtomicI64>,
}

impl SleepTracker {
    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    fn enter_sleep(&self) {
        self.sleeping.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumed_at.store(Self::now_secs(), Ordering::SeqCst);
        self.sleeping.store(false, Ordering::SeqCst);
    }

    /// Whether a clock jump right now is explained by sleep.
    fn explains_clock_jump(&self) -> bool {
        if self.sleeping.load(Ordering::SeqCst) {
            return true;
        }
        let resumed_at = self.resumed_at.load(Ordering::SeqCst);
        resumed_at != 0 && Self::now_secs() - resumed_at <= RESUME_GRACE_SECS
    }
}

/// Spawn the sleep and clock monitors.
///
/// Monitors degrade gracefully: if the bus or timerfd is unavailable a
/// warning is logged and the daemon keeps running without that detection.
pub fn start_system_event_monitors(signal_sender: Sender<SignalMessage>) -> Result<()> {
    let tracker = SleepTracker::default();

    spawn_sleep_monitor(signal_sender.clone(), tracker.clone(), 0)?;

    thread::Builder::new()
        .name("appearanced-clock".to_string())
        .spawn(move || {
            if let Err(e) = monitor_clock_changes(signal_sender, tracker) {
                log_pipe!();
                log_warning!("Clock change monitor error: {e}");
                log_indented!("Timers will not follow manual clock changes");
            }
        })
        .context("Failed to spawn clock monitor thread")?;
    Ok(())
}

fn spawn_sleep_monitor(
    signal_sender: Sender<SignalMessage>,
    tracker: SleepTracker,
    attempt: u8,
) -> Result<()> {
    thread::Builder::new()
        .name("appearanced-sleep".to_string())
        .spawn(move || {
            let Err(e) = monitor_sleep_signals(&signal_sender, &tracker) else {
                log_debug!("Sleep monitor exiting");
                return;
            };

            log_pipe!();
            log_warning!("Sleep monitor error: {e}");
            if attempt >= MAX_SLEEP_MONITOR_RESTARTS {
                log_indented!("Giving up, resume will not re-arm timers");
                return;
            }

            log_indented!(
                "Restarting sleep monitor (attempt {}/{})",
                attempt + 1,
                MAX_SLEEP_MONITOR_RESTARTS
            );
            thread::sleep(RESTART_DELAY);
            if let Err(e) = spawn_sleep_monitor(signal_sender, tracker, attempt + 1) {
                log_warning!("Failed to restart sleep monitor: {e}");
            }
        })
        .context("Failed to spawn sleep monitor thread")?;
    Ok(())
}

/// Forward logind sleep transitions until the channel or the bus goes away.
fn monitor_sleep_signals(signal_sender: &Sender<SignalMessage>, tracker: &SleepTracker) -> Result<()> {
    let connection = Connection::system().context("Failed to connect to system D-Bus")?;
    let logind =
        LogindManagerProxyBlocking::new(&connection).context("Failed to create logind proxy")?;
    let signals = logind
        .receive_prepare_for_sleep()
        .context("Failed to subscribe to PrepareForSleep")?;
    log_debug!("Subscribed to logind PrepareForSleep");

    for signal in signals {
        let going_to_sleep = match signal.args() {
            Ok(args) => args.start,
            Err(e) => {
                log_warning!("Ignoring malformed PrepareForSleep: {e}");
                continue;
            }
        };

        if going_to_sleep {
            tracker.enter_sleep();
            log_pipe!();
            log_info!("System going to sleep");
            continue;
        }

        tracker.resume();
        log_pipe!();
        log_info!("System resumed, re-arming timers");
        if signal_sender
            .send(SignalMessage::Sleep { resuming: true })
            .is_err()
        {
            return Ok(());
        }
    }

    anyhow::bail!("PrepareForSleep stream ended, D-Bus connection lost")
}

/// A realtime timer that only ever "fires" when the clock is set.
struct ClockChangeDetector {
    timer: TimerFd,
}

impl ClockChangeDetector {
    fn new() -> nix::Result<Self> {
        let timer = TimerFd::new(ClockId::CLOCK_REALTIME, TimerFlags::empty())?;
        let detector = Self { timer };
        detector.arm()?;
        Ok(detector)
    }

    fn arm(&self) -> nix::Result<()> {
        let flags =
            TimerSetTimeFlags::TFD_TIMER_ABSTIME | TimerSetTimeFlags::TFD_TIMER_CANCEL_ON_SET;
        // Far enough out never to expire on its own
        let far_future = TimeSpec::new(i64::MAX / 1000, 0);
        self.timer.set(Expiration::OneShot(far_future), flags)
    }

    /// Block until the wall clock is set.
    fn wait(&self) -> Result<()> {
        match self.timer.wait() {
            Ok(()) | Err(Errno::ECANCELED) => {
                self.arm().context("Failed to re-arm clock change timer")
            }
            Err(e) => Err(anyhow::anyhow!("clock change timer wait failed: {e}")),
        }
    }
}

fn monitor_clock_changes(signal_sender: Sender<SignalMessage>, tracker: SleepTracker) -> Result<()> {
    let detector = ClockChangeDetector::new().context("Failed to create clock change timer")?;
    log_debug!("Watching for wall-clock changes");

    loop {
        detector.wait()?;
        if tracker.explains_clock_jump() {
            log_debug!("Clock jump attributed to sleep, ignoring");
            continue;
        }

        log_pipe!();
        log_info!("System clock changed, re-arming timers");
        if signal_sender.send(SignalMessage::TimeChange).is_err() {
            return Ok(());
        }
    }
}
