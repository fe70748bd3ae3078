//! Reminder scheduler.
//!
//! # Responsibility
//! - Re-evaluate a task's reminder from scratch on every save.
//! - Cancel reminders for deleted tasks.
//! - Track which tasks currently have an armed timer.
//!
//! # Invariants
//! - The timer key is the task id ([`reminder_key`]); arming a task always
//!   replaces its previous event instead of adding one.
//! - Every evaluation cancels first, then schedules at most once, while
//!   holding the scheduler lock, so concurrent saves of one task cannot
//!   leave two timers armed.
//! - Tasks with `notify == false`, `due_time == 0`, `is_completed == true`
//!   or a fire time `<= now` end up with no armed timer.
//! - Cancelling is best-effort and never reported as an error.

use crate::clock::Clock;
use crate::model::task::{Task, TaskId};
use crate::timer::{reminder_key, TimerError, TimerResult, TimerService};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Why a save left the task without a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Task has no store-assigned id yet.
    Unsaved,
    NotifyDisabled,
    NoDueTime,
    Completed,
    /// Computed fire time is not after the current time.
    PastDue { fire_at_epoch_ms: i64 },
}

/// Outcome of one reminder evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderDecision {
    Armed { fire_at_epoch_ms: i64 },
    Skipped(SkipReason),
}

impl ReminderDecision {
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed { .. })
    }
}

/// In-memory record of an armed reminder; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub task_id: TaskId,
    pub key: String,
    pub fire_at_epoch_ms: i64,
}

/// Reminder fire time for a due time and lead time.
pub fn compute_fire_time(due_time: i64, lead_time_ms: i64) -> i64 {
    due_time.saturating_sub(lead_time_ms)
}

/// Converts a lead time in minutes to milliseconds.
pub fn lead_time_millis(minutes: u32) -> i64 {
    i64::from(minutes) * MILLIS_PER_MINUTE
}

pub struct ReminderScheduler {
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    lead_time_ms: AtomicI64,
    armed: Mutex<HashMap<TaskId, ScheduledReminder>>,
}

impl ReminderScheduler {
    pub fn new(timers: Arc<dyn TimerService>, clock: Arc<dyn Clock>, lead_time_minutes: u32) -> Self {
        Self {
            timers,
            clock,
            lead_time_ms: AtomicI64::new(lead_time_millis(lead_time_minutes)),
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Applies to later evaluations; already armed timers keep their time.
    pub fn set_lead_time_minutes(&self, minutes: u32) {
        self.lead_time_ms
            .store(lead_time_millis(minutes), Ordering::SeqCst);
    }

    pub fn lead_time_ms(&self) -> i64 {
        self.lead_time_ms.load(Ordering::SeqCst)
    }

    /// Decides the reminder state for `task` at `now_epoch_ms` without
    /// touching any timer.
    fn evaluate_at(&self, task: &Task, now_epoch_ms: i64) -> ReminderDecision {
        if !task.is_saved() {
            return ReminderDecision::Skipped(SkipReason::Unsaved);
        }
        if !task.notify {
            return ReminderDecision::Skipped(SkipReason::NotifyDisabled);
        }
        if !task.has_due_time() {
            return ReminderDecision::Skipped(SkipReason::NoDueTime);
        }
        if task.is_completed {
            return ReminderDecision::Skipped(SkipReason::Completed);
        }

        let fire_at_epoch_ms = compute_fire_time(task.due_time, self.lead_time_ms());
        if fire_at_epoch_ms <= now_epoch_ms {
            return ReminderDecision::Skipped(SkipReason::PastDue { fire_at_epoch_ms });
        }
        ReminderDecision::Armed { fire_at_epoch_ms }
    }

    /// Re-evaluates the reminder after `task` was inserted or updated.
    ///
    /// Always cancels the task's timer first, then arms a new one when the
    /// task qualifies. Calling this twice with the same task leaves exactly
    /// the same single timer (or none).
    ///
    /// # Errors
    /// - [`TimerError::Unavailable`] when the timer service refuses the event.
    pub fn on_task_saved(&self, task: &Task) -> TimerResult<ReminderDecision> {
        if !task.is_saved() {
            return Ok(ReminderDecision::Skipped(SkipReason::Unsaved));
        }

        let mut armed = self.lock();
        let now_epoch_ms = self.clock.now_epoch_ms();
        armed.retain(|_, reminder| reminder.fire_at_epoch_ms > now_epoch_ms);

        let key = reminder_key(task.id);
        self.timers.cancel(&key);
        armed.remove(&task.id);

        let decision = match self.evaluate_at(task, now_epoch_ms) {
            ReminderDecision::Armed { fire_at_epoch_ms } => {
                match self
                    .timers
                    .schedule(&key, fire_at_epoch_ms, task.reminder_payload())
                {
                    Ok(()) => {
                        armed.insert(
                            task.id,
                            ScheduledReminder {
                                task_id: task.id,
                                key,
                                fire_at_epoch_ms,
                            },
                        );
                        ReminderDecision::Armed { fire_at_epoch_ms }
                    }
                    Err(TimerError::PastDue { .. }) => {
                        warn!(
                            "event=reminder_arm module=scheduler status=skipped task_id={} reason=timer_past_due fire_at={}",
                            task.id, fire_at_epoch_ms
                        );
                        ReminderDecision::Skipped(SkipReason::PastDue { fire_at_epoch_ms })
                    }
                    Err(err) => {
                        error!(
                            "event=reminder_arm module=scheduler status=error task_id={} error={}",
                            task.id, err
                        );
                        return Err(err);
                    }
                }
            }
            skipped => skipped,
        };

        match decision {
            ReminderDecision::Armed { fire_at_epoch_ms } => info!(
                "event=reminder_arm module=scheduler status=ok task_id={} fire_at={}",
                task.id, fire_at_epoch_ms
            ),
            ReminderDecision::Skipped(reason) => debug!(
                "event=reminder_arm module=scheduler status=skipped task_id={} reason={:?}",
                task.id, reason
            ),
        }
        Ok(decision)
    }

    /// Cancels the reminder of a deleted task. No-op if none is armed.
    pub fn on_task_deleted(&self, task_id: TaskId) {
        let mut armed = self.lock();
        let was_armed = self.timers.cancel(&reminder_key(task_id));
        armed.remove(&task_id);
        debug!(
            "event=reminder_cancel module=scheduler status=ok task_id={} was_armed={}",
            task_id, was_armed
        );
    }

    /// Cancels reminders for every id in `task_ids` and every tracked
    /// reminder, used after the whole store was cleared.
    pub fn on_all_deleted(&self, task_ids: &[TaskId]) {
        let mut armed = self.lock();
        let targets = task_ids
            .iter()
            .copied()
            .chain(armed.keys().copied())
            .collect::<HashSet<_>>();

        let mut cancelled = 0usize;
        for task_id in &targets {
            if self.timers.cancel(&reminder_key(*task_id)) {
                cancelled += 1;
            }
        }
        armed.clear();
        info!(
            "event=reminder_cancel_all module=scheduler status=ok checked={} cancelled={}",
            targets.len(),
            cancelled
        );
    }

    /// Re-evaluates every task, e.g. after a process restart emptied the
    /// timer service. Returns how many reminders ended up armed.
    pub fn restore(&self, tasks: &[Task]) -> TimerResult<usize> {
        let mut armed_count = 0;
        for task in tasks {
            if self.on_task_saved(task)?.is_armed() {
                armed_count += 1;
            }
        }
        info!(
            "event=reminder_restore module=scheduler status=ok tasks={} armed={}",
            tasks.len(),
            armed_count
        );
        Ok(armed_count)
    }

    /// Armed reminder for `task_id`, if its fire time is still ahead.
    pub fn scheduled(&self, task_id: TaskId) -> Option<ScheduledReminder> {
        let now_epoch_ms = self.clock.now_epoch_ms();
        self.lock()
            .get(&task_id)
            .filter(|reminder| reminder.fire_at_epoch_ms > now_epoch_ms)
            .cloned()
    }

    /// All pending reminders, earliest first.
    pub fn scheduled_reminders(&self) -> Vec<ScheduledReminder> {
        let now_epoch_ms = self.clock.now_epoch_ms();
        let mut pending = self
            .lock()
            .values()
            .filter(|reminder| reminder.fire_at_epoch_ms > now_epoch_ms)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by_key(|reminder| (reminder.fire_at_epoch_ms, reminder.task_id));
        pending
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ScheduledReminder>> {
        self.armed.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_fire_time, ReminderDecision, ReminderScheduler, SkipReason};
    use crate::clock::ManualClock;
    use crate::model::task::Task;
    use crate::timer::{ManualTimerService, TimerCall};
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn setup(lead_minutes: u32) -> (ReminderScheduler, Arc<ManualTimerService>) {
        let clock = ManualClock::new(NOW);
        let timers = Arc::new(ManualTimerService::new(clock.clone()));
        let scheduler = ReminderScheduler::new(timers.clone(), Arc::new(clock), lead_minutes);
        (scheduler, timers)
    }

    fn saved_task(id: i64, due_time: i64) -> Task {
        let mut task = Task::new("water plants", NOW - 1_000);
        task.id = id;
        task.due_time = due_time;
        task.notify = true;
        task
    }

    #[test]
    fn fire_time_subtracts_lead() {
        assert_eq!(compute_fire_time(10_000_000, 300_000), 9_700_000);
        assert_eq!(compute_fire_time(i64::MIN + 1, 300_000), i64::MIN);
    }

    #[test]
    fn save_cancels_before_scheduling() {
        let (scheduler, timers) = setup(5);
        let task = saved_task(4, NOW + 3_600_000);

        scheduler.on_task_saved(&task).unwrap();

        assert_eq!(
            timers.calls(),
            vec![
                TimerCall::Cancel {
                    key: "4".to_string()
                },
                TimerCall::Schedule {
                    key: "4".to_string(),
                    at_epoch_ms: NOW + 3_300_000
                },
            ]
        );
    }

    #[test]
    fn fire_time_equal_to_now_is_past_due() {
        let (scheduler, timers) = setup(5);
        let task = saved_task(1, NOW + 300_000);

        let decision = scheduler.on_task_saved(&task).unwrap();

        assert_eq!(
            decision,
            ReminderDecision::Skipped(SkipReason::PastDue {
                fire_at_epoch_ms: NOW
            })
        );
        assert_eq!(timers.armed_count(), 0);
    }

    #[test]
    fn completed_task_is_not_armed() {
        let (scheduler, timers) = setup(5);
        let mut task = saved_task(2, NOW + 3_600_000);
        scheduler.on_task_saved(&task).unwrap();
        assert_eq!(timers.armed_count(), 1);

        task.is_completed = true;
        let decision = scheduler.on_task_saved(&task).unwrap();

        assert_eq!(decision, ReminderDecision::Skipped(SkipReason::Completed));
        assert_eq!(timers.armed_count(), 0);
        assert!(scheduler.scheduled(2).is_none());
    }

    #[test]
    fn unsaved_task_never_reaches_timer_service() {
        let (scheduler, timers) = setup(5);
        let task = saved_task(0, NOW + 3_600_000);

        let decision = scheduler.on_task_saved(&task).unwrap();

        assert_eq!(decision, ReminderDecision::Skipped(SkipReason::Unsaved));
        assert!(timers.calls().is_empty());
    }

    #[test]
    fn lead_time_change_applies_to_next_save() {
        let (scheduler, timers) = setup(5);
        let task = saved_task(8, NOW + 3_600_000);
        scheduler.on_task_saved(&task).unwrap();

        scheduler.set_lead_time_minutes(30);
        assert_eq!(timers.armed("8").unwrap().at_epoch_ms, NOW + 3_300_000);

        scheduler.on_task_saved(&task).unwrap();
        assert_eq!(timers.armed("8").unwrap().at_epoch_ms, NOW + 1_800_000);
    }

    #[test]
    fn fired_reminder_is_no_longer_reported_as_scheduled() {
        let (scheduler, timers) = setup(5);
        scheduler
            .on_task_saved(&saved_task(3, NOW + 600_000))
            .unwrap();
        assert!(scheduler.scheduled(3).is_some());

        timers.advance_by(300_000);

        assert!(scheduler.scheduled(3).is_none());
        assert!(scheduler.scheduled_reminders().is_empty());
    }
}
