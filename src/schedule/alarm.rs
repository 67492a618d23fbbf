//! One-shot alarms and the primitive that arms them.
//!
//! An [`AlarmEntity`] is an absolute trigger instant plus a zero-argument
//! callback, optionally repeating at a fixed interval. Entities are handed to
//! an [`AlarmService`], which owns them until they fire or are cancelled and
//! returns an opaque [`AlarmId`].
//!
//! [`ThreadAlarmService`] is the in-process primitive: a single worker thread
//! sleeps until the earliest pending instant, then runs due callbacks with no
//! internal lock held, so a callback may cancel and arm alarms on the same
//! service.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use crate::common::constants::ALARM_MAX_WAIT_SECS;
use crate::error::{AppearanceError, Result};
use crate::time_source::Clock;

/// Opaque handle of an armed alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct AlarmId(pub u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback attached to an alarm.
pub type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// A single schedulable event.
#[derive(Clone)]
pub struct AlarmEntity {
    trigger_at: DateTime<Local>,
    interval: Option<chrono::Duration>,
    callback: AlarmCallback,
}

impl AlarmEntity {
    /// One-shot alarm at `trigger_at`.
    pub fn new(trigger_at: DateTime<Local>, callback: AlarmCallback) -> Self {
        Self {
            trigger_at,
            interval: None,
            callback,
        }
    }

    /// Re-queue the alarm `interval` after every firing.
    pub fn with_interval(mut self, interval: chrono::Duration) -> Self {
        self.interval = (interval > chrono::Duration::zero()).then_some(interval);
        self
    }

    pub fn trigger_at(&self) -> DateTime<Local> {
        self.trigger_at
    }

    pub fn is_repeating(&self) -> bool {
        self.interval.is_some()
    }

    pub fn is_due(&self, now: &DateTime<Local>) -> bool {
        self.trigger_at <= *now
    }

    pub fn on_trigger(&self) {
        (self.callback)();
    }

    /// The follow-up entity for a repeating alarm, strictly after `now`.
    fn next_repeat(&self, now: &DateTime<Local>) -> Option<Self> {
        let interval = self.interval?;
        let mut next = self.trigger_at + interval;
        while next <= *now {
            next += interval;
        }
        Some(Self {
            trigger_at: next,
            interval: self.interval,
            callback: Arc::clone(&self.callback),
        })
    }
}

impl fmt::Debug for AlarmEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmEntity")
            .field("trigger_at", &self.trigger_at)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// OS-level alarm primitive.
pub trait AlarmService: Send + Sync {
    /// Arm `alarm` and return its handle.
    fn arm(&self, alarm: AlarmEntity) -> Result<AlarmId>;

    /// Cancel an armed alarm. Unknown or already-fired ids are a no-op.
    fn cancel(&self, id: AlarmId) -> Result<()>;
}

#[derive(Default)]
struct AlarmQueue {
    pending: BTreeMap<AlarmId, AlarmEntity>,
    next_id: u64,
    shutdown: bool,
}

impl AlarmQueue {
    fn insert(&mut self, alarm: AlarmEntity) -> AlarmId {
        self.next_id += 1;
        let id = AlarmId(self.next_id);
        self.pending.insert(id, alarm);
        id
    }

    fn earliest(&self) -> Option<DateTime<Local>> {
        self.pending.values().map(AlarmEntity::trigger_at).min()
    }

    /// Remove every due entity, re-queueing repeating ones under the same id.
    fn take_due(&mut self, now: &DateTime<Local>) -> Vec<(AlarmId, AlarmEntity)> {
        let due_ids: Vec<AlarmId> = self
            .pending
            .iter()
            .filter(|(_, alarm)| alarm.is_due(now))
            .map(|(id, _)| *id)
            .collect();

        let mut due = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(alarm) = self.pending.remove(&id) {
                if let Some(next) = alarm.next_repeat(now) {
                    self.pending.insert(id, next);
                }
                due.push((id, alarm));
            }
        }
        due
    }
}

struct Shared {
    queue: Mutex<AlarmQueue>,
    wakeup: Condvar,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AlarmQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Worker-thread alarm primitive driven by an injected clock.
pub struct ThreadAlarmService {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadAlarmService {
    /// Start the worker thread.
    pub fn start(clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(AlarmQueue::default()),
            wakeup: Condvar::new(),
            clock,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("appearanced-alarm".to_string())
            .spawn(move || run_worker(&worker_shared))
            .map_err(|e| anyhow::anyhow!("Failed to spawn alarm worker: {e}"))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Number of alarms waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl AlarmService for ThreadAlarmService {
    fn arm(&self, alarm: AlarmEntity) -> Result<AlarmId> {
        let mut queue = self.shared.lock();
        if queue.shutdown {
            return Err(AppearanceError::system("alarm worker stopped"));
        }
        let trigger_at = alarm.trigger_at();
        let id = queue.insert(alarm);
        drop(queue);

        log_debug!("Armed alarm {id} for {}", trigger_at.format("%Y-%m-%d %H:%M:%S"));
        self.shared.wakeup.notify_all();
        Ok(id)
    }

    fn cancel(&self, id: AlarmId) -> Result<()> {
        let removed = self.shared.lock().pending.remove(&id).is_some();
        if removed {
            log_debug!("Cancelled alarm {id}");
            self.shared.wakeup.notify_all();
        }
        Ok(())
    }
}

impl Drop for ThreadAlarmService {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        // The last owner may be a callback running on the worker itself
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: &Shared) {
    let max_wait = StdDuration::from_secs(ALARM_MAX_WAIT_SECS);
    let mut queue = shared.lock();

    loop {
        if queue.shutdown {
            return;
        }

        let now = shared.clock.now();
        let due = queue.take_due(&now);
        if !due.is_empty() {
            drop(queue);
            for (id, alarm) in due {
                log_debug!("Alarm {id} fired");
                alarm.on_trigger();
            }
            queue = shared.lock();
            continue;
        }

        let wait = match queue.earliest() {
            Some(earliest) => (earliest - now).to_std().unwrap_or_default().min(max_wait),
            None => max_wait,
        };
        queue = match shared.wakeup.wait_timeout(queue, wait) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_source::SystemClock;
    use std::sync::mpsc;

    fn channel_callback(tx: mpsc::Sender<&'static str>, tag: &'static str) -> AlarmCallback {
        let tx = Mutex::new(tx);
        Arc::new(move || {
            let _ = tx.lock().unwrap().send(tag);
        })
    }

    #[test]
    fn test_alarm_entity_due_and_repeat() {
        let now = Local::now();
        let alarm = AlarmEntity::new(now, Arc::new(|| {}))
            .with_interval(chrono::Duration::minutes(10));
        assert!(alarm.is_due(&now));
        assert!(alarm.is_repeating());

        let next = alarm
            .next_repeat(&(now + chrono::Duration::minutes(25)))
            .unwrap();
        assert_eq!(next.trigger_at(), now + chrono::Duration::minutes(30));
    }

    #[test]
    fn test_zero_interval_is_one_shot() {
        let alarm = AlarmEntity::new(Local::now(), Arc::new(|| {}))
            .with_interval(chrono::Duration::zero());
        assert!(!alarm.is_repeating());
    }

    #[test]
    fn test_queue_take_due_keeps_future_alarms() {
        let now = Local::now();
        let mut queue = AlarmQueue::default();
        let past = queue.insert(AlarmEntity::new(
            now - chrono::Duration::seconds(1),
            Arc::new(|| {}),
        ));
        let future = queue.insert(AlarmEntity::new(
            now + chrono::Duration::hours(1),
            Arc::new(|| {}),
        ));

        let due = queue.take_due(&now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, past);
        assert!(queue.pending.contains_key(&future));
        assert_eq!(queue.earliest(), Some(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_thread_service_fires_due_alarm() {
        let service = ThreadAlarmService::start(Arc::new(SystemClock)).unwrap();
        let (tx, rx) = mpsc::channel();

        let trigger = Local::now() + chrono::Duration::milliseconds(50);
        service
            .arm(AlarmEntity::new(trigger, channel_callback(tx, "fired")))
            .unwrap();

        assert_eq!(rx.recv_timeout(StdDuration::from_secs(5)), Ok("fired"));
        assert_eq!(service.pending_count(), 0);
    }

    #[test]
    fn test_thread_service_cancel_prevents_firing() {
        let service = ThreadAlarmService::start(Arc::new(SystemClock)).unwrap();
        let (tx, rx) = mpsc::channel();

        let trigger = Local::now() + chrono::Duration::milliseconds(200);
        let id = service
            .arm(AlarmEntity::new(trigger, channel_callback(tx, "fired")))
            .unwrap();
        service.cancel(id).unwrap();

        assert!(rx.recv_timeout(StdDuration::from_millis(600)).is_err());
        // Cancelling again is a no-op
        assert!(service.cancel(id).is_ok());
    }

    #[test]
    fn test_callback_may_rearm_on_same_service() {
        let service = Arc::new(ThreadAlarmService::start(Arc::new(SystemClock)).unwrap());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let weak = Arc::downgrade(&service);
        let callback: AlarmCallback = Arc::new(move || {
            let _ = tx.lock().unwrap().send(());
            if let Some(service) = weak.upgrade() {
                let again = Local::now() + chrono::Duration::hours(1);
                service
                    .arm(AlarmEntity::new(again, Arc::new(|| {})))
                    .unwrap();
            }
        });

        service
            .arm(AlarmEntity::new(Local::now(), callback))
            .unwrap();
        rx.recv_timeout(StdDuration::from_secs(5)).unwrap();

        // Give the callback a moment to finish arming
        std::thread::sleep(StdDuration::from_millis(50));
        assert_eq!(service.pending_count(), 1);
    }
}
