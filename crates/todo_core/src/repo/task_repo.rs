//! Task repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide durable CRUD over the `tasks` table.
//! - Keep SQL and column encoding inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `Task::validate()` before SQL mutations.
//! - Each call is one SQL statement or one transaction, so a record is never
//!   partially persisted.
//! - `creation_time` is written on insert only.
//! - Read paths reject undecodable rows instead of masking them.
//! - The repository never touches reminder timers.
//!
//! # Ordering
//! Default listing is `due_time ASC, id ASC`: tasks without a due time (`0`)
//! come first. Descending order is the exact mirror.

use crate::db::DbError;
use crate::model::task::{Task, TaskId, TaskValidationError, UNSAVED_TASK_ID};
use log::{debug, error};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    creation_time,
    due_time,
    is_completed,
    notify,
    category,
    attachments
FROM tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for task persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Caller-correctable input problem; nothing was written.
    Validation(TaskValidationError),
    /// Underlying storage failure.
    Db(DbError),
    NotFound(TaskId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Sort direction over `due_time`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DueOrder {
    #[default]
    Ascending,
    Descending,
}

/// Query options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    /// Drop tasks with `is_completed == true`.
    pub hide_completed: bool,
    /// Case-insensitive substring filter on `title`.
    pub title_contains: Option<String>,
    pub order: DueOrder,
}

/// Repository interface for task CRUD operations.
pub trait TaskRepository {
    /// Inserts an unsaved task and returns the id assigned to it.
    fn insert_task(&self, task: &Task) -> RepoResult<TaskId>;
    /// Replaces every mutable field of the stored task with the same id.
    fn update_task(&self, task: &Task) -> RepoResult<()>;
    /// Removes one task. Returns whether a row existed.
    fn delete_task(&self, id: TaskId) -> RepoResult<bool>;
    /// Removes every task and returns the removed ids.
    fn delete_all_tasks(&self) -> RepoResult<Vec<TaskId>>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>>;

    /// All tasks in default order.
    fn get_all_tasks(&self) -> RepoResult<Vec<Task>> {
        self.list_tasks(&TaskListQuery::default())
    }
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn insert_task(&self, task: &Task) -> RepoResult<TaskId> {
        if task.id != UNSAVED_TASK_ID {
            return Err(TaskValidationError::IdAlreadyAssigned(task.id).into());
        }
        task.validate()?;

        self.conn
            .execute(
                "INSERT INTO tasks (
                    title,
                    description,
                    creation_time,
                    due_time,
                    is_completed,
                    notify,
                    category,
                    attachments
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    task.title.as_str(),
                    task.description.as_str(),
                    task.creation_time,
                    task.due_time,
                    task.is_completed,
                    task.notify,
                    task.category.as_str(),
                    encode_attachments(&task.attachments)?,
                ],
            )
            .map_err(|err| log_write_failure("insert", err))?;

        let id = self.conn.last_insert_rowid();
        debug!("event=task_insert module=repo status=ok task_id={id}");
        Ok(id)
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;

        let changed = self
            .conn
            .execute(
                "UPDATE tasks
                 SET
                    title = ?1,
                    description = ?2,
                    due_time = ?3,
                    is_completed = ?4,
                    notify = ?5,
                    category = ?6,
                    attachments = ?7
                 WHERE id = ?8;",
                params![
                    task.title.as_str(),
                    task.description.as_str(),
                    task.due_time,
                    task.is_completed,
                    task.notify,
                    task.category.as_str(),
                    encode_attachments(&task.attachments)?,
                    task.id,
                ],
            )
            .map_err(|err| log_write_failure("update", err))?;

        if changed == 0 {
            return Err(RepoError::NotFound(task.id));
        }

        debug!("event=task_update module=repo status=ok task_id={}", task.id);
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1;", [id])
            .map_err(|err| log_write_failure("delete", err))?;

        debug!("event=task_delete module=repo status=ok task_id={id} existed={}", changed > 0);
        Ok(changed > 0)
    }

    fn delete_all_tasks(&self) -> RepoResult<Vec<TaskId>> {
        let tx = self.conn.unchecked_transaction()?;
        let ids = {
            let mut stmt = tx.prepare("SELECT id FROM tasks ORDER BY id ASC;")?;
            let rows = stmt.query_map([], |row| row.get::<_, TaskId>(0))?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            ids
        };
        tx.execute("DELETE FROM tasks;", [])
            .map_err(|err| log_write_failure("delete_all", err))?;
        tx.commit()?;

        debug!("event=task_delete_all module=repo status=ok count={}", ids.len());
        Ok(ids)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1 LIMIT 1;"))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }

        Ok(None)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
        if query.hide_completed {
            sql.push_str(" AND is_completed = 0");
        }
        sql.push_str(match query.order {
            DueOrder::Ascending => " ORDER BY due_time ASC, id ASC",
            DueOrder::Descending => " ORDER BY due_time DESC, id DESC",
        });

        let needle = query
            .title_contains
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();

        while let Some(row) = rows.next()? {
            let task = parse_task_row(row)?;
            if let Some(needle) = needle.as_deref() {
                if !task.title.to_lowercase().contains(needle) {
                    continue;
                }
            }
            tasks.push(task);
        }

        Ok(tasks)
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id: TaskId = row.get("id")?;

    let attachments_text: String = row.get("attachments")?;
    let attachments = serde_json::from_str::<Vec<String>>(&attachments_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid attachments for task {id}: {err}"))
    })?;

    let task = Task {
        id,
        title: row.get("title")?,
        description: row.get("description")?,
        creation_time: row.get("creation_time")?,
        due_time: row.get("due_time")?,
        is_completed: parse_flag(id, "is_completed", row.get("is_completed")?)?,
        notify: parse_flag(id, "notify", row.get("notify")?)?,
        category: row.get("category")?,
        attachments,
    };
    task.validate().map_err(|err| {
        RepoError::InvalidData(format!("stored task {id} fails validation: {err}"))
    })?;
    Ok(task)
}

fn parse_flag(id: TaskId, column: &str, value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` for task {id}"
        ))),
    }
}

/// Attachments are stored as a JSON array string; the encoding is part of
/// the on-disk format.
fn encode_attachments(attachments: &[String]) -> RepoResult<String> {
    serde_json::to_string(attachments)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode attachments: {err}")))
}

fn log_write_failure(operation: &str, err: rusqlite::Error) -> rusqlite::Error {
    error!("event=task_write module=repo status=error operation={operation} error={err}");
    err
}

#[cfg(test)]
mod tests {
    use super::{encode_attachments, parse_flag, RepoError};

    #[test]
    fn attachments_encoding_keeps_commas_inside_identifiers() {
        let encoded = encode_attachments(&["content://a,b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(encoded, r#"["content://a,b","c"]"#);
    }

    #[test]
    fn parse_flag_rejects_out_of_range_values() {
        assert!(matches!(
            parse_flag(3, "notify", 2),
            Err(RepoError::InvalidData(_))
        ));
    }
}
