//! Task use-case service.
//!
//! # Responsibility
//! - Provide the entry points the UI layer calls for task CRUD.
//! - Run the reminder scheduler after every successful mutation.
//!
//! # Invariants
//! - The store write happens first; the scheduler only sees persisted state.
//! - A failed store write never touches timers.
//! - A timer failure after a successful write is reported, but the write
//!   stays persisted; saving the task again retries the reminder.
//! - Every mutation holds the service write lock from the store write until
//!   the scheduler has run, so the armed timer always matches the last
//!   persisted version of a task.

use crate::clock::Clock;
use crate::model::task::{Task, TaskId, TaskValidationError};
use crate::reminder::scheduler::{ReminderDecision, ReminderScheduler};
use crate::repo::task_repo::{RepoError, TaskListQuery, TaskRepository};
use crate::settings::AppSettings;
use crate::timer::TimerError;
use log::{error, info};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub enum TaskServiceError {
    /// Input rejected before persistence; show to the user for correction.
    Validation(TaskValidationError),
    NotFound(TaskId),
    /// Persistence failure; the caller retries or reports it.
    Storage(RepoError),
    /// Task was saved, but its reminder could not be armed.
    Timer(TimerError),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Timer(err) => write!(f, "task saved but reminder not armed: {err}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Storage(err) => Some(err),
            Self::Timer(err) => Some(err),
        }
    }
}

impl From<RepoError> for TaskServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl From<TimerError> for TaskServiceError {
    fn from(value: TimerError) -> Self {
        Self::Timer(value)
    }
}

pub type TaskServiceResult<T> = Result<T, TaskServiceError>;

/// Persisted task plus what the scheduler decided for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTask {
    pub task: Task,
    pub reminder: ReminderDecision,
}

/// Use-case facade over a task repository and the reminder scheduler.
pub struct TaskService<R: TaskRepository> {
    repo: R,
    scheduler: Arc<ReminderScheduler>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: R, scheduler: Arc<ReminderScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            scheduler,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    /// Inserts a new task and arms its reminder when it qualifies.
    ///
    /// `creation_time` is stamped from the clock when left at `0`.
    pub fn create_task(&self, mut task: Task) -> TaskServiceResult<SavedTask> {
        if task.creation_time == 0 {
            task.creation_time = self.clock.now_epoch_ms();
        }
        let _guard = self.lock_writes();
        task.id = self.repo.insert_task(&task)?;
        let reminder = self.scheduler.on_task_saved(&task)?;
        info!(
            "event=task_create module=service status=ok task_id={} reminder_armed={}",
            task.id,
            reminder.is_armed()
        );
        Ok(SavedTask { task, reminder })
    }

    /// Replaces the stored task with the same id and re-evaluates its reminder.
    ///
    /// # Errors
    /// - `NotFound` when no task has `task.id`; there is no upsert.
    pub fn update_task(&self, task: &Task) -> TaskServiceResult<SavedTask> {
        let _guard = self.lock_writes();
        self.update_locked(task)
    }

    fn update_locked(&self, task: &Task) -> TaskServiceResult<SavedTask> {
        self.repo.update_task(task)?;
        let stored = self
            .repo
            .get_task(task.id)?
            .ok_or(TaskServiceError::NotFound(task.id))?;
        let reminder = self.scheduler.on_task_saved(&stored)?;
        info!(
            "event=task_update module=service status=ok task_id={} reminder_armed={}",
            stored.id,
            reminder.is_armed()
        );
        Ok(SavedTask {
            task: stored,
            reminder,
        })
    }

    /// Marks a task done or not done. Completing cancels its reminder.
    pub fn set_completed(&self, id: TaskId, completed: bool) -> TaskServiceResult<SavedTask> {
        let _guard = self.lock_writes();
        let mut task = self.get_task(id)?;
        task.is_completed = completed;
        self.update_locked(&task)
    }

    pub fn toggle_completed(&self, id: TaskId) -> TaskServiceResult<SavedTask> {
        let _guard = self.lock_writes();
        let mut task = self.get_task(id)?;
        task.is_completed = !task.is_completed;
        self.update_locked(&task)
    }

    /// Deletes one task and cancels its reminder. Returns whether it existed.
    pub fn delete_task(&self, id: TaskId) -> TaskServiceResult<bool> {
        let _guard = self.lock_writes();
        let existed = self.repo.delete_task(id)?;
        self.scheduler.on_task_deleted(id);
        info!("event=task_delete module=service status=ok task_id={id} existed={existed}");
        Ok(existed)
    }

    /// Deletes every task and cancels every reminder. Returns the count removed.
    pub fn delete_all(&self) -> TaskServiceResult<usize> {
        let _guard = self.lock_writes();
        let removed = self.repo.delete_all_tasks().map_err(|err| {
            error!("event=task_delete_all module=service status=error error={err}");
            err
        })?;
        self.scheduler.on_all_deleted(&removed);
        info!(
            "event=task_delete_all module=service status=ok count={}",
            removed.len()
        );
        Ok(removed.len())
    }

    pub fn get_task(&self, id: TaskId) -> TaskServiceResult<Task> {
        self.repo
            .get_task(id)?
            .ok_or(TaskServiceError::NotFound(id))
    }

    /// Every task, ordered by due time ascending (no due time first).
    pub fn all_tasks(&self) -> TaskServiceResult<Vec<Task>> {
        Ok(self.repo.get_all_tasks()?)
    }

    pub fn list_tasks(&self, query: &TaskListQuery) -> TaskServiceResult<Vec<Task>> {
        Ok(self.repo.list_tasks(query)?)
    }

    /// Home-screen listing: honours the "hide completed" setting and an
    /// optional title search.
    pub fn visible_tasks(
        &self,
        settings: &AppSettings,
        title_contains: Option<&str>,
    ) -> TaskServiceResult<Vec<Task>> {
        self.list_tasks(&TaskListQuery {
            hide_completed: settings.hide_completed,
            title_contains: title_contains.map(str::to_string),
            ..TaskListQuery::default()
        })
    }

    /// Pushes settings that affect reminders to the scheduler.
    pub fn apply_settings(&self, settings: &AppSettings) {
        self.scheduler
            .set_lead_time_minutes(settings.lead_time_minutes);
    }

    /// Re-arms reminders for every stored task and cancels tracked reminders
    /// whose task is gone, e.g. at process start or after another process
    /// changed the store. Returns how many reminders are armed.
    pub fn restore_reminders(&self) -> TaskServiceResult<usize> {
        let _guard = self.lock_writes();
        let tasks = self.repo.get_all_tasks()?;
        let stored_ids = tasks.iter().map(|task| task.id).collect::<HashSet<_>>();
        for reminder in self.scheduler.scheduled_reminders() {
            if !stored_ids.contains(&reminder.task_id) {
                self.scheduler.on_task_deleted(reminder.task_id);
            }
        }
        Ok(self.scheduler.restore(&tasks)?)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|err| err.into_inner())
    }
}
