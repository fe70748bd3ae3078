//! Thread-backed timer service.
//!
//! A single named worker thread sleeps on a condition variable until the
//! earliest armed event is due, then hands due payloads to the sink with the
//! lock released. Events live in process memory only; after a restart the
//! host re-arms them through `TaskService::restore_reminders`.

use super::{due_keys, ArmedTimer, ReminderSink, TimerError, TimerResult, TimerService};
use crate::clock::{Clock, SystemClock};
use crate::model::task::ReminderPayload;
use log::{debug, error, info};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WORKER_THREAD_NAME: &str = "reminder-timer";

#[derive(Default)]
struct TimerState {
    armed: HashMap<String, ArmedTimer>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Timer service running on a dedicated worker thread.
pub struct ThreadTimerService {
    shared: Arc<Shared>,
    clock: SystemClock,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimerService {
    /// Spawns the worker thread; fired payloads go to `sink`.
    pub fn start(sink: Arc<dyn ReminderSink>) -> TimerResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        });
        let clock = SystemClock;

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(&worker_shared, sink.as_ref(), clock))
            .map_err(|err| TimerError::Unavailable(format!("cannot spawn timer thread: {err}")))?;

        info!("event=timer_start module=timer status=ok");
        Ok(Self {
            shared,
            clock,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Events currently armed, earliest first.
    pub fn armed(&self) -> Vec<ArmedTimer> {
        let state = self.shared.lock();
        let mut armed = state.armed.values().cloned().collect::<Vec<_>>();
        armed.sort_by(|a, b| (a.at_epoch_ms, &a.key).cmp(&(b.at_epoch_ms, &b.key)));
        armed
    }

    fn stop(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(handle) = handle {
            // A sink dropping the last handle from inside a delivery must not
            // join its own thread.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("event=timer_stop module=timer status=error error=worker_panicked");
            }
        }
    }
}

impl TimerService for ThreadTimerService {
    fn schedule(&self, key: &str, at_epoch_ms: i64, payload: ReminderPayload) -> TimerResult<()> {
        let now_epoch_ms = self.clock.now_epoch_ms();
        if at_epoch_ms <= now_epoch_ms {
            return Err(TimerError::PastDue {
                at_epoch_ms,
                now_epoch_ms,
            });
        }

        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(TimerError::Unavailable("timer service stopped".to_string()));
        }
        state.armed.insert(
            key.to_string(),
            ArmedTimer {
                key: key.to_string(),
                at_epoch_ms,
                payload,
            },
        );
        drop(state);
        self.shared.wakeup.notify_all();

        debug!("event=timer_schedule module=timer status=ok key={key} at_epoch_ms={at_epoch_ms}");
        Ok(())
    }

    fn cancel(&self, key: &str) -> bool {
        let removed = self.shared.lock().armed.remove(key).is_some();
        if removed {
            self.shared.wakeup.notify_all();
        }
        debug!("event=timer_cancel module=timer status=ok key={key} was_armed={removed}");
        removed
    }
}

impl Drop for ThreadTimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared, sink: &dyn ReminderSink, clock: SystemClock) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = clock.now_epoch_ms();
        let due = due_keys(state.armed.iter(), now)
            .into_iter()
            .filter_map(|key| state.armed.remove(&key))
            .collect::<Vec<_>>();

        if !due.is_empty() {
            drop(state);
            for timer in due {
                fire(sink, timer, now);
            }
            state = shared.lock();
            continue;
        }

        let next_at = state.armed.values().map(|timer| timer.at_epoch_ms).min();
        state = match next_at {
            None => shared
                .wakeup
                .wait(state)
                .unwrap_or_else(|err| err.into_inner()),
            Some(at) => {
                let wait_ms = u64::try_from(at.saturating_sub(now)).unwrap_or(1).max(1);
                shared
                    .wakeup
                    .wait_timeout(state, Duration::from_millis(wait_ms))
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|err| err.into_inner().0)
            }
        };
    }
    debug!("event=timer_stop module=timer status=ok");
}

fn fire(sink: &dyn ReminderSink, timer: ArmedTimer, now: i64) {
    info!(
        "event=timer_fire module=timer status=ok key={} at_epoch_ms={} lag_ms={}",
        timer.key,
        timer.at_epoch_ms,
        now - timer.at_epoch_ms
    );
    let payload = timer.payload;
    if catch_unwind(AssertUnwindSafe(|| sink.deliver(payload))).is_err() {
        error!(
            "event=timer_fire module=timer status=error key={} error=sink_panicked",
            timer.key
        );
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadTimerService;
    use crate::clock::{Clock, SystemClock};
    use crate::model::task::ReminderPayload;
    use crate::timer::{ReminderSink, TimerError, TimerService};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct ChannelSink(Mutex<Sender<ReminderPayload>>);

    impl ReminderSink for ChannelSink {
        fn deliver(&self, payload: ReminderPayload) {
            let _ = self.0.lock().unwrap().send(payload);
        }
    }

    fn start() -> (ThreadTimerService, Receiver<ReminderPayload>) {
        let (tx, rx) = channel();
        let service = ThreadTimerService::start(Arc::new(ChannelSink(Mutex::new(tx)))).unwrap();
        (service, rx)
    }

    fn payload(task_id: i64, title: &str) -> ReminderPayload {
        ReminderPayload {
            task_id,
            title: title.to_string(),
        }
    }

    #[test]
    fn fires_payload_after_deadline() {
        let (service, rx) = start();
        let at = SystemClock.now_epoch_ms() + 40;
        service.schedule("1", at, payload(1, "stretch")).unwrap();

        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired, payload(1, "stretch"));
        assert!(SystemClock.now_epoch_ms() >= at);
        assert!(service.armed().is_empty());
    }

    #[test]
    fn reschedule_replaces_previous_event() {
        let (service, rx) = start();
        let now = SystemClock.now_epoch_ms();
        service.schedule("7", now + 60_000, payload(7, "old")).unwrap();
        service.schedule("7", now + 30, payload(7, "new")).unwrap();

        assert_eq!(service.armed().len(), 1);
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.title, "new");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn cancelled_event_never_fires() {
        let (service, rx) = start();
        let at = SystemClock.now_epoch_ms() + 50;
        service.schedule("3", at, payload(3, "call")).unwrap();

        assert!(service.cancel("3"));
        assert!(!service.cancel("3"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn past_due_schedule_is_rejected() {
        let (service, _rx) = start();
        let now = SystemClock.now_epoch_ms();
        let err = service.schedule("9", now - 1, payload(9, "late")).unwrap_err();
        assert!(matches!(err, TimerError::PastDue { .. }));
        assert!(service.armed().is_empty());
    }
}
