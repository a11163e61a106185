//! Per-task detectors: fetch upstream state and classify it against what the
//! task saw last. Detectors are the only mutators of detection state, and
//! every persist goes through the store's fenced update so a cycle racing a
//! STOP cannot resurrect a deleted task.

use chrono::NaiveDate;
use tracing::debug;
use watch_core::{classify_status, format_score, next_phase, select_day, CourtPhase, PollingTask};

use crate::store::TaskStore;
use crate::upstream::ScheduleSource;

/// Court events produced by one last-match cycle, in court listing order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CourtEvents {
    pub going_out: Vec<String>,
    pub completed: Vec<(String, Option<String>)>,
}

impl CourtEvents {
    pub fn is_empty(&self) -> bool {
        self.going_out.is_empty() && self.completed.is_empty()
    }
}

/// Schedule-release check: true when the published day list has grown since
/// the last observation. The first observation only records the baseline, so
/// enabling monitoring mid-tournament stays silent.
pub fn check_schedule_release(
    store: &TaskStore,
    source: &dyn ScheduleSource,
    task: &mut PollingTask,
) -> Result<bool, String> {
    let days = source.schedule_days(&task.tournament_key)?;
    let day_count = days.len() as u32;

    match task.previous_day_count {
        None => {
            task.previous_day_count = Some(day_count);
            persist(store, task)?;
            Ok(false)
        }
        Some(previous) if day_count > previous => {
            task.previous_day_count = Some(day_count);
            let landed = persist(store, task)?;
            Ok(landed)
        }
        Some(_) => Ok(false),
    }
}

/// Last-match check: inspects the last listed match on each court for the
/// selected day and advances per-court phases, never backwards.
pub fn check_last_match(
    store: &TaskStore,
    source: &dyn ScheduleSource,
    task: &mut PollingTask,
    today: NaiveDate,
) -> Result<CourtEvents, String> {
    let days = source.schedule_days(&task.tournament_key)?;
    let Some(day) = select_day(&days, today) else {
        return Ok(CourtEvents::default());
    };
    let day_id = day.id.clone();

    let courts = source.court_schedule(&day_id)?;
    let mut events = CourtEvents::default();

    for court in &courts {
        let Some(last) = court.matches.last() else {
            continue;
        };
        let Some(observed) = classify_status(&last.status) else {
            continue;
        };
        let current = task.court_state.get(&court.court).copied();
        let Some(next) = next_phase(current, observed) else {
            continue;
        };

        match next {
            CourtPhase::GoingOut => events.going_out.push(court.court.clone()),
            CourtPhase::Complete => events.completed.push((
                court.court.clone(),
                format_score(last.score_a.as_deref(), last.score_b.as_deref()),
            )),
        }
        task.court_state.insert(court.court.clone(), next);
    }

    if !events.is_empty() && !persist(store, task)? {
        // The task was stopped mid-cycle; suppress its events.
        return Ok(CourtEvents::default());
    }
    Ok(events)
}

fn persist(store: &TaskStore, task: &PollingTask) -> Result<bool, String> {
    let landed = store.update_state(task)?;
    if !landed {
        debug!(task_id = %task.id, "Dropped state write for a task deleted mid-cycle");
    }
    Ok(landed)
}
