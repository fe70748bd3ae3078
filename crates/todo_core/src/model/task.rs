//! Task domain model.
//!
//! # Responsibility
//! - Define the durable task record and its validation rules.
//! - Define the reminder payload captured when a timer is armed.
//!
//! # Invariants
//! - `id == 0` means "not stored yet"; the store assigns the real id once.
//! - `due_time == 0` means "no due time"; other values are epoch milliseconds.
//! - A stored task always has a non-blank `title`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned task identity, also used as the reminder timer key.
pub type TaskId = i64;

/// Sentinel for tasks that have not been inserted yet.
pub const UNSAVED_TASK_ID: TaskId = 0;

/// Sentinel for "no due time".
pub const NO_DUE_TIME: i64 = 0;

/// Validation failures detected before any write reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskValidationError {
    /// Title is empty or whitespace only.
    BlankTitle,
    /// Due time is negative; only `0` or a positive epoch is allowed.
    NegativeDueTime(i64),
    /// Insert was called with a task that already carries an id.
    IdAlreadyAssigned(TaskId),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "task title is required"),
            Self::NegativeDueTime(value) => {
                write!(f, "due time must be 0 or a positive epoch, got {value}")
            }
            Self::IdAlreadyAssigned(id) => {
                write!(f, "task already has id {id}; insert expects an unsaved task")
            }
        }
    }
}

impl Error for TaskValidationError {}

/// Durable task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    /// Epoch milliseconds; never changed by updates.
    pub creation_time: i64,
    /// Epoch milliseconds, or [`NO_DUE_TIME`].
    pub due_time: i64,
    pub is_completed: bool,
    /// Whether a reminder should be armed for this task.
    pub notify: bool,
    /// Free-form label; not checked against the configured category list.
    pub category: String,
    /// Opaque resource identifiers, order preserved.
    pub attachments: Vec<String>,
}

impl Task {
    /// Creates an unsaved task with every optional field at its default.
    pub fn new(title: impl Into<String>, creation_time: i64) -> Self {
        Self {
            id: UNSAVED_TASK_ID,
            title: title.into(),
            description: String::new(),
            creation_time,
            due_time: NO_DUE_TIME,
            is_completed: false,
            notify: false,
            category: String::new(),
            attachments: Vec::new(),
        }
    }

    /// Returns whether the store has assigned an id yet.
    pub fn is_saved(&self) -> bool {
        self.id != UNSAVED_TASK_ID
    }

    pub fn has_due_time(&self) -> bool {
        self.due_time != NO_DUE_TIME
    }

    /// Checks field-level rules shared by insert and update.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::BlankTitle);
        }
        if self.due_time < 0 {
            return Err(TaskValidationError::NegativeDueTime(self.due_time));
        }
        Ok(())
    }

    /// Snapshot handed to the timer service when a reminder is armed.
    pub fn reminder_payload(&self) -> ReminderPayload {
        ReminderPayload {
            task_id: self.id,
            title: self.title.clone(),
        }
    }
}

/// Data crossing into the timer service and notification dispatcher.
///
/// Captured at arm time and never refreshed from the store, so a title
/// edited after arming is not reflected until the task is saved again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub task_id: TaskId,
    pub title: String,
}
