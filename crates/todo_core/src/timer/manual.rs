//! Virtual-clock timer service for tests and simulations.
//!
//! Nothing fires on its own: [`ManualTimerService::advance_to`] moves the
//! shared [`ManualClock`] and fires whatever became due, in `(time, key)`
//! order. Every `schedule`/`cancel` call is recorded so callers can assert
//! on call sequences.

use super::{due_keys, ArmedTimer, ReminderSink, TimerError, TimerResult, TimerService};
use crate::clock::{Clock, ManualClock};
use crate::model::task::ReminderPayload;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded call against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCall {
    Schedule { key: String, at_epoch_ms: i64 },
    Cancel { key: String },
}

#[derive(Default)]
struct ManualState {
    armed: HashMap<String, ArmedTimer>,
    calls: Vec<TimerCall>,
}

pub struct ManualTimerService {
    clock: ManualClock,
    state: Mutex<ManualState>,
    sink: Mutex<Option<Arc<dyn ReminderSink>>>,
}

impl ManualTimerService {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Mutex::new(ManualState::default()),
            sink: Mutex::new(None),
        }
    }

    /// Routes fired payloads to `sink` from now on.
    pub fn set_sink(&self, sink: Arc<dyn ReminderSink>) {
        *self.sink.lock().unwrap_or_else(|err| err.into_inner()) = Some(sink);
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn armed(&self, key: &str) -> Option<ArmedTimer> {
        self.lock().armed.get(key).cloned()
    }

    pub fn armed_count(&self) -> usize {
        self.lock().armed.len()
    }

    /// Armed keys in ascending order.
    pub fn armed_keys(&self) -> Vec<String> {
        let mut keys = self.lock().armed.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn calls(&self) -> Vec<TimerCall> {
        self.lock().calls.clone()
    }

    /// Sets the clock to `now_epoch_ms` and fires every due event.
    ///
    /// Returns the fired payloads in firing order.
    pub fn advance_to(&self, now_epoch_ms: i64) -> Vec<ReminderPayload> {
        self.clock.set(now_epoch_ms);

        let mut state = self.lock();
        let fired = due_keys(state.armed.iter(), now_epoch_ms)
            .into_iter()
            .filter_map(|key| state.armed.remove(&key))
            .map(|timer| timer.payload)
            .collect::<Vec<_>>();
        drop(state);

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        if let Some(sink) = sink {
            for payload in &fired {
                sink.deliver(payload.clone());
            }
        }
        fired
    }

    pub fn advance_by(&self, delta_ms: i64) -> Vec<ReminderPayload> {
        self.advance_to(self.clock.now_epoch_ms() + delta_ms)
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl TimerService for ManualTimerService {
    fn schedule(&self, key: &str, at_epoch_ms: i64, payload: ReminderPayload) -> TimerResult<()> {
        let mut state = self.lock();
        state.calls.push(TimerCall::Schedule {
            key: key.to_string(),
            at_epoch_ms,
        });

        let now_epoch_ms = self.clock.now_epoch_ms();
        if at_epoch_ms <= now_epoch_ms {
            return Err(TimerError::PastDue {
                at_epoch_ms,
                now_epoch_ms,
            });
        }

        state.armed.insert(
            key.to_string(),
            ArmedTimer {
                key: key.to_string(),
                at_epoch_ms,
                payload,
            },
        );
        Ok(())
    }

    fn cancel(&self, key: &str) -> bool {
        let mut state = self.lock();
        state.calls.push(TimerCall::Cancel {
            key: key.to_string(),
        });
        state.armed.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{ManualTimerService, TimerCall};
    use crate::clock::ManualClock;
    use crate::model::task::ReminderPayload;
    use crate::timer::{TimerError, TimerService};

    fn payload(task_id: i64) -> ReminderPayload {
        ReminderPayload {
            task_id,
            title: format!("task {task_id}"),
        }
    }

    #[test]
    fn advance_fires_due_events_in_time_order() {
        let timers = ManualTimerService::new(ManualClock::new(0));
        timers.schedule("2", 200, payload(2)).unwrap();
        timers.schedule("1", 100, payload(1)).unwrap();
        timers.schedule("3", 900, payload(3)).unwrap();

        let fired = timers.advance_to(500);
        assert_eq!(fired, vec![payload(1), payload(2)]);
        assert_eq!(timers.armed_keys(), vec!["3"]);
    }

    #[test]
    fn event_fires_exactly_at_its_time_not_before() {
        let timers = ManualTimerService::new(ManualClock::new(0));
        timers.schedule("1", 100, payload(1)).unwrap();

        assert!(timers.advance_to(99).is_empty());
        assert_eq!(timers.advance_to(100), vec![payload(1)]);
    }

    #[test]
    fn schedule_at_now_is_past_due_and_recorded() {
        let timers = ManualTimerService::new(ManualClock::new(1_000));
        let err = timers.schedule("1", 1_000, payload(1)).unwrap_err();

        assert!(matches!(err, TimerError::PastDue { .. }));
        assert_eq!(timers.armed_count(), 0);
        assert_eq!(
            timers.calls(),
            vec![TimerCall::Schedule {
                key: "1".to_string(),
                at_epoch_ms: 1_000
            }]
        );
    }
}
