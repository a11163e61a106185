//! Per-task polling loops.
//!
//! The registry owns one loop thread per task id. Loops are cancelled
//! cooperatively: `stop` flips the task's cancel flag and the thread exits at
//! the next slice boundary. An in-flight upstream fetch is never aborted; the
//! store's fenced writes make its trailing persist harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::store::TaskStore;

const CANCEL_POLL_SLICE_MS: u64 = 200;

/// Verdict from one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Terminate,
}

/// Runs one poll cycle for a task id. Implemented by the engine; tests
/// substitute fakes.
pub trait CycleRunner: Send + Sync {
    fn run_cycle(&self, task_id: &str) -> CycleOutcome;
}

#[derive(Clone)]
struct TaskHandle {
    cancel: Arc<AtomicBool>,
    // Held for the length of a cycle so the sweep never interleaves with the
    // regular loop for the same id.
    gate: Arc<Mutex<()>>,
}

pub struct TaskRegistry {
    interval: Duration,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl TaskRegistry {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or cleanly restarts) the polling loop for a task id: one cycle
    /// immediately, then one per interval. Any existing loop for the id is
    /// cancelled first, so there are never two loops for the same id.
    pub fn start(self: &Arc<Self>, task_id: &str, runner: Arc<dyn CycleRunner>) {
        let handle = TaskHandle {
            cancel: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Mutex::new(())),
        };
        if let Some(previous) = self
            .lock_tasks()
            .insert(task_id.to_string(), handle.clone())
        {
            previous.cancel.store(true, Ordering::SeqCst);
            debug!(task_id = %task_id, "Cancelled previous loop before restart");
        }

        let registry = Arc::clone(self);
        let id = task_id.to_string();
        thread::spawn(move || registry.run_loop(id, handle, runner));
    }

    /// Cancels the loop for a task id and forgets it; no-op when absent.
    pub fn stop(&self, task_id: &str) {
        if let Some(handle) = self.lock_tasks().remove(task_id) {
            handle.cancel.store(true, Ordering::SeqCst);
            debug!(task_id = %task_id, "Stopped polling loop");
        }
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock_tasks().contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// The cycle gate for an active loop, used by the sweep to skip ids with
    /// a cycle already in flight.
    fn gate(&self, task_id: &str) -> Option<Arc<Mutex<()>>> {
        self.lock_tasks()
            .get(task_id)
            .map(|handle| Arc::clone(&handle.gate))
    }

    fn run_loop(&self, task_id: String, handle: TaskHandle, runner: Arc<dyn CycleRunner>) {
        loop {
            if handle.cancel.load(Ordering::SeqCst) {
                return;
            }
            let outcome = {
                let _cycle = handle
                    .gate
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                runner.run_cycle(&task_id)
            };
            if outcome == CycleOutcome::Terminate {
                self.finish(&task_id, &handle.cancel);
                return;
            }
            if !self.sleep_until_next_cycle(&handle.cancel) {
                return;
            }
        }
    }

    /// Sleeps one poll interval in short slices; returns false when cancelled.
    fn sleep_until_next_cycle(&self, cancel: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.interval;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(CANCEL_POLL_SLICE_MS)));
        }
    }

    /// Removes a finished loop's own mapping, unless a restart has already
    /// replaced it with a newer handle.
    fn finish(&self, task_id: &str, cancel: &Arc<AtomicBool>) {
        let mut tasks = self.lock_tasks();
        if let Some(current) = tasks.get(task_id) {
            if Arc::ptr_eq(&current.cancel, cancel) {
                tasks.remove(task_id);
            }
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, TaskHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Restarts loops for every stored task that has none. Safe to invoke
/// repeatedly and concurrently: `start` is idempotent per id.
pub fn resume_all(
    store: &TaskStore,
    registry: &Arc<TaskRegistry>,
    runner: &Arc<dyn CycleRunner>,
) -> usize {
    let tasks = match store.get_all() {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(error = %err, "Failed to load tasks for resumption");
            return 0;
        }
    };

    let mut resumed = 0;
    for task in tasks {
        if !registry.is_active(&task.id) {
            registry.start(&task.id, Arc::clone(runner));
            resumed += 1;
        }
    }
    resumed
}

/// One sequential poll pass over every stored task, used as the coarse
/// backstop when the regular timers may not have been running. Ids with a
/// cycle already in flight are skipped.
pub fn sweep_all(store: &TaskStore, registry: &TaskRegistry, runner: &dyn CycleRunner) -> usize {
    let tasks = match store.get_all() {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(error = %err, "Failed to load tasks for sweep");
            return 0;
        }
    };

    let mut ran = 0;
    for task in tasks {
        match registry.gate(&task.id) {
            Some(gate) => match gate.try_lock() {
                Ok(_cycle) => {
                    runner.run_cycle(&task.id);
                    ran += 1;
                }
                Err(_) => {
                    debug!(task_id = %task.id, "Skipping sweep; a cycle is already in flight");
                }
            },
            None => {
                runner.run_cycle(&task.id);
                ran += 1;
            }
        }
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtwatch_daemon_protocol::{TaskKind, TaskSpec};
    use std::sync::atomic::AtomicUsize;
    use watch_core::PollingTask;

    struct CountingRunner {
        cycles: AtomicUsize,
        outcome: CycleOutcome,
    }

    impl CountingRunner {
        fn new(outcome: CycleOutcome) -> Arc<Self> {
            Arc::new(Self {
                cycles: AtomicUsize::new(0),
                outcome,
            })
        }

        fn count(&self) -> usize {
            self.cycles.load(Ordering::SeqCst)
        }
    }

    impl CycleRunner for CountingRunner {
        fn run_cycle(&self, _task_id: &str) -> CycleOutcome {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        predicate()
    }

    #[test]
    fn start_runs_one_cycle_immediately() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner = CountingRunner::new(CycleOutcome::Continue);

        registry.start("task-1", runner.clone());
        assert!(wait_until(Duration::from_secs(2), || runner.count() == 1));
        assert!(registry.is_active("task-1"));
    }

    #[test]
    fn start_twice_leaves_exactly_one_active_loop() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner = CountingRunner::new(CycleOutcome::Continue);

        registry.start("task-1", runner.clone());
        registry.start("task-1", runner.clone());

        assert!(wait_until(Duration::from_secs(2), || runner.count() >= 1));
        assert_eq!(registry.active_count(), 1);

        // One stop halts all future cycles for the id.
        registry.stop("task-1");
        assert!(!registry.is_active("task-1"));
        thread::sleep(Duration::from_millis(100));
        let settled = runner.count();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(runner.count(), settled);
    }

    #[test]
    fn stop_is_a_noop_for_unknown_ids() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        registry.stop("never-started");
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn terminate_outcome_removes_the_handle() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner = CountingRunner::new(CycleOutcome::Terminate);

        registry.start("task-1", runner.clone());
        assert!(wait_until(Duration::from_secs(2), || {
            !registry.is_active("task-1")
        }));
        assert_eq!(runner.count(), 1);
    }

    #[test]
    fn loop_repeats_on_the_configured_interval() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_millis(50)));
        let runner = CountingRunner::new(CycleOutcome::Continue);

        registry.start("task-1", runner.clone());
        assert!(wait_until(Duration::from_secs(2), || runner.count() >= 3));
        registry.stop("task-1");
    }

    fn stored_task(store: &TaskStore, key: &str) -> PollingTask {
        let task = PollingTask::from_spec(&TaskSpec::new(key, "Tournament", TaskKind::LastMatch));
        store.put(&task).expect("put task");
        task
    }

    #[test]
    fn resume_all_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TaskStore::new(dir.path().join("tasks.db")).expect("store init");
        stored_task(&store, "key-1");

        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner: Arc<dyn CycleRunner> = CountingRunner::new(CycleOutcome::Continue);

        assert_eq!(resume_all(&store, &registry, &runner), 1);
        assert_eq!(resume_all(&store, &registry, &runner), 0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn resume_all_after_stop_and_delete_is_silent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TaskStore::new(dir.path().join("tasks.db")).expect("store init");
        let task = stored_task(&store, "key-1");

        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner: Arc<dyn CycleRunner> = CountingRunner::new(CycleOutcome::Continue);
        assert_eq!(resume_all(&store, &registry, &runner), 1);

        registry.stop(&task.id);
        store.delete(&task.id).expect("delete task");

        assert_eq!(resume_all(&store, &registry, &runner), 0);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn sweep_runs_a_cycle_for_every_stored_task() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TaskStore::new(dir.path().join("tasks.db")).expect("store init");
        stored_task(&store, "key-1");
        stored_task(&store, "key-2");

        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let runner = CountingRunner::new(CycleOutcome::Continue);

        assert_eq!(sweep_all(&store, &registry, runner.as_ref()), 2);
        assert_eq!(runner.count(), 2);
    }

    #[test]
    fn sweep_skips_a_task_whose_cycle_is_in_flight() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TaskStore::new(dir.path().join("tasks.db")).expect("store init");
        let task = stored_task(&store, "key-1");

        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(60)));
        let handle = TaskHandle {
            cancel: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Mutex::new(())),
        };
        registry
            .lock_tasks()
            .insert(task.id.clone(), handle.clone());

        let _in_flight = handle.gate.lock().expect("hold gate");
        let runner = CountingRunner::new(CycleOutcome::Continue);
        assert_eq!(sweep_all(&store, &registry, runner.as_ref()), 0);
        assert_eq!(runner.count(), 0);
    }
}
