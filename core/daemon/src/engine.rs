//! Poll cycle executor.
//!
//! One cycle: re-read the stored task, run its detector, dispatch
//! notifications, and decide termination. The stored row is authoritative;
//! loops only carry the task id, so a STOP that lands between cycles is seen
//! as a missing row and ends the loop.

use std::sync::Arc;
use tracing::{info, warn};

use courtwatch_daemon_protocol::TaskKind;
use watch_core::PollingTask;

use crate::detector::{check_last_match, check_schedule_release};
use crate::notify::{make_tag, Notification, Notifier};
use crate::registry::{CycleOutcome, CycleRunner};
use crate::store::TaskStore;
use crate::upstream::ScheduleSource;

pub struct Engine {
    store: Arc<TaskStore>,
    source: Box<dyn ScheduleSource>,
    notifier: Box<dyn Notifier>,
    icon: Option<String>,
}

impl Engine {
    pub fn new(
        store: Arc<TaskStore>,
        source: Box<dyn ScheduleSource>,
        notifier: Box<dyn Notifier>,
        icon: Option<String>,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            icon,
        }
    }

    fn schedule_release_cycle(&self, mut task: PollingTask) -> CycleOutcome {
        match check_schedule_release(self.store.as_ref(), self.source.as_ref(), &mut task) {
            Ok(true) => {
                self.dispatch(
                    &task,
                    format!("Order of Play released for {}", task.tournament_name),
                );
                info!(task_id = %task.id, "Order of Play released; finishing task");
                self.finish_task(&task.id)
            }
            Ok(false) => CycleOutcome::Continue,
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    error = %err,
                    "Schedule check failed; retrying next cycle"
                );
                CycleOutcome::Continue
            }
        }
    }

    fn last_match_cycle(&self, mut task: PollingTask) -> CycleOutcome {
        let today = chrono::Local::now().date_naive();
        let events =
            match check_last_match(self.store.as_ref(), self.source.as_ref(), &mut task, today) {
                Ok(events) => events,
                Err(err) => {
                    warn!(
                        task_id = %task.id,
                        error = %err,
                        "Court check failed; retrying next cycle"
                    );
                    return CycleOutcome::Continue;
                }
            };

        for court in &events.going_out {
            self.dispatch(
                &task,
                format!(
                    "Last match going out on {} at {}",
                    court, task.tournament_name
                ),
            );
        }
        for (court, score) in &events.completed {
            let body = match score {
                Some(score) => format!(
                    "Last match complete on {} ({}) at {}",
                    court, score, task.tournament_name
                ),
                None => format!(
                    "Last match complete on {} at {}",
                    court, task.tournament_name
                ),
            };
            self.dispatch(&task, body);
        }

        if task.all_courts_complete() {
            info!(
                task_id = %task.id,
                courts = task.court_state.len(),
                "All courts complete; finishing task"
            );
            self.finish_task(&task.id)
        } else {
            CycleOutcome::Continue
        }
    }

    fn dispatch(&self, task: &PollingTask, body: String) {
        let notification = Notification {
            title: task.tournament_name.clone(),
            body,
            icon: self.icon.clone(),
            tag: make_tag(&task.id),
            tournament_key: task.tournament_key.clone(),
        };
        if let Err(err) = self.notifier.notify(&notification) {
            warn!(task_id = %task.id, error = %err, "Failed to display notification");
        }
    }

    fn finish_task(&self, task_id: &str) -> CycleOutcome {
        match self.store.delete(task_id) {
            Ok(()) => CycleOutcome::Terminate,
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    error = %err,
                    "Failed to delete finished task; retrying next cycle"
                );
                CycleOutcome::Continue
            }
        }
    }
}

impl CycleRunner for Engine {
    fn run_cycle(&self, task_id: &str) -> CycleOutcome {
        let task = match self.store.get(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::debug!(task_id = %task_id, "Task gone from store; ending loop");
                return CycleOutcome::Terminate;
            }
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    error = %err,
                    "Failed to read task; retrying next cycle"
                );
                return CycleOutcome::Continue;
            }
        };

        match task.kind {
            TaskKind::ScheduleRelease => self.schedule_release_cycle(task),
            TaskKind::LastMatch => self.last_match_cycle(task),
        }
    }
}
