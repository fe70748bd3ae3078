use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use todo_core::{
    ManualClock, ManualTimerService, RepoError, RepoResult, ReminderScheduler, Task, TaskId,
    TaskListQuery, TaskRepository, TaskService,
};

const NOW: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 3_600_000;

/// Parks the next `get_task` call after it has read its row, until released.
struct ReadGate {
    parked: Sender<()>,
    release: Receiver<()>,
}

/// Thread-safe in-memory repository whose reads can be held open.
#[derive(Default)]
struct GatedRepository {
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    next_id: AtomicI64,
    gate: Mutex<Option<ReadGate>>,
}

impl GatedRepository {
    fn hold_next_read(&self, parked: Sender<()>, release: Receiver<()>) {
        *self.gate.lock().unwrap() = Some(ReadGate { parked, release });
    }

    fn stored(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }
}

impl TaskRepository for &GatedRepository {
    fn insert_task(&self, task: &Task) -> RepoResult<TaskId> {
        task.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tasks
            .lock()
            .unwrap()
            .insert(id, Task { id, ..task.clone() });
        Ok(id)
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = Task {
                    creation_time: stored.creation_time,
                    ..task.clone()
                };
                Ok(())
            }
            None => Err(RepoError::NotFound(task.id)),
        }
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<bool> {
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }

    fn delete_all_tasks(&self) -> RepoResult<Vec<TaskId>> {
        let mut tasks = self.tasks.lock().unwrap();
        let ids = tasks.keys().copied().collect();
        tasks.clear();
        Ok(ids)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let found = self.stored(id);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.parked.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        Ok(found)
    }

    fn list_tasks(&self, _query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by_key(|task| (task.due_time, task.id));
        Ok(tasks)
    }
}

fn service(
    repo: &GatedRepository,
) -> (TaskService<&GatedRepository>, Arc<ManualTimerService>) {
    let clock = ManualClock::new(NOW);
    let timers = Arc::new(ManualTimerService::new(clock.clone()));
    let clock = Arc::new(clock);
    let scheduler = Arc::new(ReminderScheduler::new(timers.clone(), clock.clone(), 5));
    (TaskService::new(repo, scheduler, clock), timers)
}

fn reminder_task(title: &str) -> Task {
    let mut task = Task::new(title, 0);
    task.due_time = NOW + HOUR_MS;
    task.notify = true;
    task
}

/// Starts `update_task(held)` on its own thread and returns once that update
/// has written and re-read the task and is parked before scheduling.
fn run_with_held_update<T: Send>(
    repo: &GatedRepository,
    tasks: &TaskService<&GatedRepository>,
    held: &Task,
    competing: impl FnOnce() -> T + Send,
) -> T {
    let (parked_tx, parked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    repo.hold_next_read(parked_tx, release_rx);

    thread::scope(|scope| {
        let held_update = scope.spawn(|| tasks.update_task(held));
        parked_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let competing = scope.spawn(competing);
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        held_update.join().unwrap().unwrap();
        competing.join().unwrap()
    })
}

#[test]
fn later_update_disabling_notify_wins_over_held_update() {
    let repo = GatedRepository::default();
    let (tasks, timers) = service(&repo);
    let created = tasks.create_task(reminder_task("standup")).unwrap().task;

    let mut renamed = created.clone();
    renamed.title = "standup moved".to_string();
    let mut silenced = created.clone();
    silenced.notify = false;

    run_with_held_update(&repo, &tasks, &renamed, || {
        tasks.update_task(&silenced).unwrap();
    });

    assert!(!repo.stored(created.id).unwrap().notify);
    assert_eq!(timers.armed_count(), 0);
    assert!(tasks.scheduler().scheduled(created.id).is_none());
}

#[test]
fn delete_during_held_update_leaves_no_orphan_timer() {
    let repo = GatedRepository::default();
    let (tasks, timers) = service(&repo);
    let created = tasks.create_task(reminder_task("renew passport")).unwrap().task;

    let existed = run_with_held_update(&repo, &tasks, &created, || {
        tasks.delete_task(created.id).unwrap()
    });

    assert!(existed);
    assert!(repo.stored(created.id).is_none());
    assert_eq!(timers.armed_count(), 0);
}
