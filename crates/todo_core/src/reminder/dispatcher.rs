//! Notification dispatcher.
//!
//! Turns a fired [`ReminderPayload`] into one user-visible alert and, when
//! the alert is activated, asks the host to open the task.
//!
//! The dispatcher trusts the payload captured at arm time and does not
//! re-read the task store. An alert for a task that was deleted or renamed
//! after arming shows the stale data; the host handles a navigation request
//! for a missing task like any other not-found id.

use crate::model::task::{ReminderPayload, TaskId};
use crate::timer::ReminderSink;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Heading shown on every reminder alert.
pub const ALERT_HEADING: &str = "Reminder";
/// Body used when the captured title is blank.
pub const FALLBACK_BODY: &str = "Task Reminder";
/// Alerts kept for activation; older ones are evicted first.
pub const MAX_ACTIVE_ALERTS: usize = 64;

/// Alert handed to the host for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Unique per alert, used to activate or dismiss it.
    pub id: u64,
    pub task_id: TaskId,
    pub heading: String,
    pub body: String,
}

/// Host facility that displays alerts.
pub trait Notifier: Send + Sync {
    fn present(&self, notification: &Notification);
}

/// Host facility that opens a task's screen.
pub trait Navigator: Send + Sync {
    fn open_task(&self, task_id: TaskId);
}

/// Notifier that only writes a log line.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn present(&self, notification: &Notification) {
        info!(
            "event=notification_present module=dispatcher status=ok notification_id={} task_id={}",
            notification.id, notification.task_id
        );
    }
}

/// Navigator that queues requests for the host to drain.
#[derive(Debug, Default)]
pub struct NavigationQueue {
    requests: Mutex<Vec<TaskId>>,
}

impl NavigationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every pending request, oldest first.
    pub fn drain(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(|err| err.into_inner()))
    }
}

impl Navigator for NavigationQueue {
    fn open_task(&self, task_id: TaskId) {
        self.requests
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(task_id);
    }
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    next_id: AtomicU64,
    active: Mutex<BTreeMap<u64, TaskId>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            notifier,
            navigator,
            next_id: AtomicU64::new(1),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    /// Presents one alert for a fired reminder and returns it.
    pub fn dispatch(&self, payload: &ReminderPayload) -> Notification {
        let body = if payload.title.trim().is_empty() {
            FALLBACK_BODY.to_string()
        } else {
            payload.title.clone()
        };
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            task_id: payload.task_id,
            heading: ALERT_HEADING.to_string(),
            body,
        };

        {
            let mut active = self.lock();
            active.insert(notification.id, notification.task_id);
            while active.len() > MAX_ACTIVE_ALERTS {
                if active.pop_first().is_none() {
                    break;
                }
            }
        }
        self.notifier.present(&notification);
        debug!(
            "event=notification_dispatch module=dispatcher status=ok notification_id={} task_id={}",
            notification.id, notification.task_id
        );
        notification
    }

    /// Handles a tap on an alert: dismisses it and requests navigation.
    ///
    /// Returns the task id navigated to, or `None` when the alert is unknown
    /// or was already activated.
    pub fn activate(&self, notification_id: u64) -> Option<TaskId> {
        let task_id = self.lock().remove(&notification_id)?;
        self.navigator.open_task(task_id);
        info!(
            "event=notification_activate module=dispatcher status=ok notification_id={} task_id={}",
            notification_id, task_id
        );
        Some(task_id)
    }

    /// Drops an alert without navigating. Returns whether it was active.
    pub fn dismiss(&self, notification_id: u64) -> bool {
        let dismissed = self.lock().remove(&notification_id).is_some();
        debug!(
            "event=notification_dismiss module=dispatcher status=ok notification_id={} dismissed={}",
            notification_id, dismissed
        );
        dismissed
    }

    /// Alerts shown and not yet activated or dismissed, oldest first, as
    /// `(notification_id, task_id)`.
    pub fn active(&self) -> Vec<(u64, TaskId)> {
        self.lock()
            .iter()
            .map(|(id, task_id)| (*id, *task_id))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, TaskId>> {
        self.active.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ReminderSink for NotificationDispatcher {
    fn deliver(&self, payload: ReminderPayload) {
        self.dispatch(&payload);
    }
}
