//! Timer service: one-shot wake events keyed by string.
//!
//! # Responsibility
//! - Define the contract the reminder scheduler arms and cancels against.
//! - Provide a thread-backed implementation and a virtual-clock fake.
//!
//! # Invariants
//! - At most one event is armed per key; `schedule` replaces, never adds.
//! - `cancel` is always safe and never fails, armed or not.
//! - Events fire at or after their time, never before.
//! - Implementations reject past-due times with [`TimerError::PastDue`].
//! - The payload delivered on fire is the one captured at `schedule` time.

use crate::model::task::{ReminderPayload, TaskId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod manual;
pub mod thread;

pub use manual::{ManualTimerService, TimerCall};
pub use thread::ThreadTimerService;

pub type TimerResult<T> = Result<T, TimerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// Requested fire time is not in the future.
    PastDue { at_epoch_ms: i64, now_epoch_ms: i64 },
    /// The backing facility cannot accept events.
    Unavailable(String),
}

impl Display for TimerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PastDue {
                at_epoch_ms,
                now_epoch_ms,
            } => write!(
                f,
                "timer at {at_epoch_ms} is not after current time {now_epoch_ms}"
            ),
            Self::Unavailable(reason) => write!(f, "timer service unavailable: {reason}"),
        }
    }
}

impl Error for TimerError {}

/// Receiver for fired events.
pub trait ReminderSink: Send + Sync {
    fn deliver(&self, payload: ReminderPayload);
}

/// Abstraction over the facility that fires a one-shot callback at an
/// absolute time.
pub trait TimerService: Send + Sync {
    /// Arms one event under `key`, replacing any event already armed there.
    fn schedule(&self, key: &str, at_epoch_ms: i64, payload: ReminderPayload) -> TimerResult<()>;

    /// Disarms the event under `key`. Returns whether one was armed.
    fn cancel(&self, key: &str) -> bool;
}

/// Snapshot of one armed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedTimer {
    pub key: String,
    pub at_epoch_ms: i64,
    pub payload: ReminderPayload,
}

/// Timer key used for a task's reminder.
///
/// The key is the task id itself, so re-arming a task always lands on the
/// same slot and replaces the previous event.
pub fn reminder_key(task_id: TaskId) -> String {
    task_id.to_string()
}

/// Keys of every entry due at `now_epoch_ms`, ordered by `(time, key)`.
pub(crate) fn due_keys<'a, I>(entries: I, now_epoch_ms: i64) -> Vec<String>
where
    I: IntoIterator<Item = (&'a String, &'a ArmedTimer)>,
{
    let mut due = entries
        .into_iter()
        .filter(|(_, timer)| timer.at_epoch_ms <= now_epoch_ms)
        .map(|(key, timer)| (timer.at_epoch_ms, key.clone()))
        .collect::<Vec<_>>();
    due.sort();
    due.into_iter().map(|(_, key)| key).collect()
}
