//! Command-line host for the to-do reminder core.
//!
//! # Responsibility
//! - Map subcommands onto `TaskService` and `AppSettings` calls.
//! - Supply the host collaborators: a stdout notifier, a navigation queue
//!   and a thread-backed timer service.
//!
//! Reminders only fire while `todo watch` is running; other commands report
//! what the scheduler decided and exit.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use todo_core::db::open_db;
use todo_core::{
    AppSettings, Clock, DueOrder, LogNotifier, NavigationQueue, Notification, NotificationDispatcher,
    Notifier, ReminderDecision, ReminderScheduler, SkipReason, SqlitePreferenceStore,
    SqliteTaskRepository, SystemClock, Task, TaskId, TaskListQuery, TaskService,
    ThreadTimerService,
};

const DUE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Task list with due-time reminders.
#[derive(Parser)]
#[command(name = "todo", version, about)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, default_value = "todo.sqlite3")]
    db: PathBuf,

    /// Directory for rolling log files. Logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task.
    Add {
        title: String,
        #[command(flatten)]
        fields: TaskFields,
    },

    /// List tasks ordered by due time.
    List {
        /// Only titles containing this text (case-insensitive).
        #[arg(long)]
        search: Option<String>,
        /// Latest due time first.
        #[arg(long)]
        desc: bool,
        /// Include completed tasks even when the setting hides them.
        #[arg(long)]
        all: bool,
    },

    /// Print every field of one task.
    Show { id: TaskId },

    /// Change fields of an existing task.
    Edit {
        id: TaskId,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
        /// Remove the due time.
        #[arg(long, conflicts_with = "due")]
        clear_due: bool,
        /// Remove every attachment before adding `--attach` entries.
        #[arg(long)]
        clear_attachments: bool,
    },

    /// Mark a task done (or not done with `--undo`).
    Complete {
        id: TaskId,
        #[arg(long)]
        undo: bool,
    },

    /// Flip a task between done and not done.
    Toggle { id: TaskId },

    /// Delete one task.
    Delete { id: TaskId },

    /// Delete every task.
    Clear {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show or change settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Keep running and show reminders as they fire.
    Watch {
        /// Seconds between store re-syncs.
        #[arg(long, default_value_t = 30)]
        poll_secs: u64,
        /// Open the task as soon as its reminder is shown.
        #[arg(long)]
        auto_open: bool,
    },
}

#[derive(Args, Default)]
struct TaskFields {
    #[arg(long)]
    description: Option<String>,
    /// Local due time, `YYYY-MM-DD HH:MM`.
    #[arg(long)]
    due: Option<String>,
    /// Enable or disable the reminder.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    notify: Option<bool>,
    #[arg(long)]
    category: Option<String>,
    /// Attachment URI; repeat for several.
    #[arg(long = "attach")]
    attachments: Vec<String>,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// Reminder lead time in minutes.
    LeadTime { minutes: String },
    AddCategory { name: String },
    RemoveCategory { name: String },
    HideCompleted {
        #[arg(action = ArgAction::Set)]
        hide: bool,
    },
}

/// Prints alerts to stdout.
struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn present(&self, notification: &Notification) {
        println!(
            "[{}] {} (task #{}, alert {})",
            notification.heading, notification.body, notification.task_id, notification.id
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli
            .log_level
            .as_deref()
            .unwrap_or_else(|| todo_core::default_log_level());
        start_logging(level, log_dir)?;
    }

    let conn = open_db(&cli.db)
        .with_context(|| format!("failed to open database `{}`", cli.db.display()))?;
    let preferences = SqlitePreferenceStore::new(&conn);
    let mut settings = AppSettings::load(&preferences)?;

    // One-shot commands exit before any reminder can fire; only `watch`
    // prints alerts.
    let notifier: Arc<dyn Notifier> = if matches!(cli.command, Command::Watch { .. }) {
        Arc::new(StdoutNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let navigation = Arc::new(NavigationQueue::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(notifier, navigation.clone()));
    let timers = Arc::new(ThreadTimerService::start(dispatcher.clone())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(ReminderScheduler::new(
        timers,
        clock.clone(),
        settings.lead_time_minutes,
    ));
    let tasks = TaskService::new(SqliteTaskRepository::new(&conn), scheduler, clock);

    match cli.command {
        Command::Add { title, fields } => {
            let mut task = Task::new(title, 0);
            apply_fields(&mut task, fields)?;
            let saved = tasks.create_task(task)?;
            println!("added #{}", saved.task.id);
            println!("reminder: {}", describe_reminder(&saved.reminder));
        }
        Command::List { search, desc, all } => {
            let query = TaskListQuery {
                hide_completed: settings.hide_completed && !all,
                title_contains: search,
                order: if desc {
                    DueOrder::Descending
                } else {
                    DueOrder::Ascending
                },
            };
            let listed = tasks.list_tasks(&query)?;
            if listed.is_empty() {
                println!("no tasks");
            }
            for task in &listed {
                println!("{}", summary_line(task));
            }
        }
        Command::Show { id } => print_task(&tasks.get_task(id)?),
        Command::Edit {
            id,
            title,
            fields,
            clear_due,
            clear_attachments,
        } => {
            let mut task = tasks.get_task(id)?;
            if let Some(title) = title {
                task.title = title;
            }
            if clear_due {
                task.due_time = 0;
            }
            if clear_attachments {
                task.attachments.clear();
            }
            apply_fields(&mut task, fields)?;
            let saved = tasks.update_task(&task)?;
            println!("updated #{}", saved.task.id);
            println!("reminder: {}", describe_reminder(&saved.reminder));
        }
        Command::Complete { id, undo } => {
            let saved = tasks.set_completed(id, !undo)?;
            println!("{}", summary_line(&saved.task));
        }
        Command::Toggle { id } => {
            let saved = tasks.toggle_completed(id)?;
            println!("{}", summary_line(&saved.task));
        }
        Command::Delete { id } => {
            if tasks.delete_task(id)? {
                println!("deleted #{id}");
            } else {
                println!("no task #{id}");
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every task without --yes");
            }
            println!("deleted {} tasks", tasks.delete_all()?);
        }
        Command::Settings { action } => {
            match action.unwrap_or(SettingsAction::Show) {
                SettingsAction::Show => {}
                SettingsAction::LeadTime { minutes } => {
                    settings.set_lead_time_from_input(&minutes)?;
                }
                SettingsAction::AddCategory { name } => settings.add_category(&name)?,
                SettingsAction::RemoveCategory { name } => {
                    if !settings.remove_category(&name) {
                        bail!("unknown category `{}`", name.trim());
                    }
                }
                SettingsAction::HideCompleted { hide } => settings.set_hide_completed(hide),
            }
            settings.save(&preferences)?;
            print_settings(&settings);
        }
        Command::Watch {
            poll_secs,
            auto_open,
        } => {
            println!("watching `{}`; press Ctrl+C to stop", cli.db.display());
            loop {
                settings = AppSettings::load(&preferences)?;
                tasks.apply_settings(&settings);
                let armed = tasks.restore_reminders()?;
                info!("event=cli_watch_sync module=cli status=ok armed={armed}");

                std::thread::sleep(Duration::from_secs(poll_secs.max(1)));

                // Printed alerts cannot be clicked; open or dismiss each one.
                for (notification_id, _) in dispatcher.active() {
                    if auto_open {
                        dispatcher.activate(notification_id);
                    } else {
                        dispatcher.dismiss(notification_id);
                    }
                }
                for id in navigation.drain() {
                    match tasks.get_task(id) {
                        Ok(task) => print_task(&task),
                        Err(err) => println!("cannot open task #{id}: {err}"),
                    }
                }
            }
        }
    }

    Ok(())
}

fn start_logging(level: &str, log_dir: &Path) -> Result<()> {
    let absolute = if log_dir.is_absolute() {
        log_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(log_dir)
    };
    let dir = absolute
        .to_str()
        .with_context(|| format!("log dir `{}` is not valid UTF-8", absolute.display()))?;
    todo_core::init_logging(level, dir).map_err(anyhow::Error::msg)
}

fn apply_fields(task: &mut Task, fields: TaskFields) -> Result<()> {
    if let Some(description) = fields.description {
        task.description = description;
    }
    if let Some(due) = fields.due {
        task.due_time = parse_due(&due)?;
    }
    if let Some(notify) = fields.notify {
        task.notify = notify;
    }
    if let Some(category) = fields.category {
        task.category = category.trim().to_string();
    }
    task.attachments.extend(fields.attachments);
    Ok(())
}

fn parse_due(input: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), DUE_FORMAT)
        .with_context(|| format!("due time `{input}` is not `YYYY-MM-DD HH:MM`"))?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .with_context(|| format!("due time `{input}` is ambiguous or skipped in local time"))?;
    Ok(local.timestamp_millis())
}

fn format_epoch_ms(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(time) => time.format(DUE_FORMAT).to_string(),
        None => format!("{epoch_ms}ms"),
    }
}

fn describe_reminder(decision: &ReminderDecision) -> String {
    match decision {
        ReminderDecision::Armed { fire_at_epoch_ms } => {
            format!("at {}", format_epoch_ms(*fire_at_epoch_ms))
        }
        ReminderDecision::Skipped(SkipReason::Unsaved) => "none (task not saved)".to_string(),
        ReminderDecision::Skipped(SkipReason::NotifyDisabled) => "off".to_string(),
        ReminderDecision::Skipped(SkipReason::NoDueTime) => "none (no due time)".to_string(),
        ReminderDecision::Skipped(SkipReason::Completed) => "none (completed)".to_string(),
        ReminderDecision::Skipped(SkipReason::PastDue { fire_at_epoch_ms }) => format!(
            "none (would have fired at {})",
            format_epoch_ms(*fire_at_epoch_ms)
        ),
    }
}

fn summary_line(task: &Task) -> String {
    let mark = if task.is_completed { "x" } else { " " };
    let due = if task.has_due_time() {
        format_epoch_ms(task.due_time)
    } else {
        "-".to_string()
    };
    let bell = if task.notify { " *" } else { "" };
    let category = if task.category.is_empty() {
        String::new()
    } else {
        format!(" ({})", task.category)
    };
    format!("#{:<4} [{mark}] {due:<16} {}{category}{bell}", task.id, task.title)
}

fn print_task(task: &Task) {
    println!("id:          {}", task.id);
    println!("title:       {}", task.title);
    if !task.description.is_empty() {
        println!("description: {}", task.description);
    }
    println!("created:     {}", format_epoch_ms(task.creation_time));
    if task.has_due_time() {
        println!("due:         {}", format_epoch_ms(task.due_time));
    }
    println!("completed:   {}", task.is_completed);
    println!("notify:      {}", task.notify);
    if !task.category.is_empty() {
        println!("category:    {}", task.category);
    }
    for attachment in &task.attachments {
        println!("attachment:  {attachment}");
    }
}

fn print_settings(settings: &AppSettings) {
    println!("lead time:      {} min", settings.lead_time_minutes);
    println!("hide completed: {}", settings.hide_completed);
    if settings.categories.is_empty() {
        println!("categories:     -");
    } else {
        println!("categories:     {}", settings.categories.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::{describe_reminder, parse_due, Cli};
    use clap::{CommandFactory, Parser};
    use todo_core::{ReminderDecision, SkipReason};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_due_accepts_local_minutes_and_rejects_other_shapes() {
        let parsed = parse_due("2030-06-01 09:30").unwrap();
        let later = parse_due("2030-06-01 09:31").unwrap();
        assert_eq!(later - parsed, 60_000);
        assert!(parse_due("tomorrow").is_err());
        assert!(parse_due("2030-06-01").is_err());
    }

    #[test]
    fn notify_flag_without_value_means_true() {
        let cli = Cli::try_parse_from(["todo", "add", "call", "--notify"]).unwrap();
        match cli.command {
            super::Command::Add { fields, .. } => assert_eq!(fields.notify, Some(true)),
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn skipped_reminders_are_described() {
        assert_eq!(
            describe_reminder(&ReminderDecision::Skipped(SkipReason::NotifyDisabled)),
            "off"
        );
        assert_eq!(
            describe_reminder(&ReminderDecision::Skipped(SkipReason::Completed)),
            "none (completed)"
        );
    }
}
