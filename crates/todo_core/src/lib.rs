//! Core domain logic for the to-do reminder app.
//! This crate is the single source of truth for task storage and reminder
//! invariants; screens, forms and OS integration live in the host.

pub mod clock;
pub mod db;
pub mod logging;
pub mod model;
pub mod reminder;
pub mod repo;
pub mod service;
pub mod settings;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::task::{ReminderPayload, Task, TaskId, TaskValidationError, NO_DUE_TIME};
pub use reminder::dispatcher::{
    LogNotifier, NavigationQueue, Navigator, Notification, NotificationDispatcher, Notifier,
};
pub use reminder::scheduler::{
    compute_fire_time, ReminderDecision, ReminderScheduler, ScheduledReminder, SkipReason,
};
pub use repo::preference_repo::SqlitePreferenceStore;
pub use repo::task_repo::{
    DueOrder, RepoError, RepoResult, SqliteTaskRepository, TaskListQuery, TaskRepository,
};
pub use service::task_service::{SavedTask, TaskService, TaskServiceError, TaskServiceResult};
pub use settings::{AppSettings, MemoryPreferenceStore, PreferenceStore, SettingsError};
pub use timer::{
    reminder_key, ArmedTimer, ManualTimerService, ReminderSink, ThreadTimerService, TimerCall,
    TimerError, TimerResult, TimerService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
