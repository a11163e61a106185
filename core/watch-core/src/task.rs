//! The persisted monitoring task and its accumulated detection state.

use courtwatch_daemon_protocol::{TaskKind, TaskSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a tracked court currently stands. A court absent from the state map
/// is in the implicit "unset" phase; phases only ever move forward
/// (unset -> going out -> complete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtPhase {
    GoingOut,
    Complete,
}

/// One unit of persisted monitoring work.
///
/// `previous_day_count` is only ever set on schedule-release tasks and
/// `court_state` only ever populated on last-match tasks; the matching
/// detector is the sole mutator of either field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingTask {
    pub id: String,
    pub tournament_key: String,
    pub tournament_name: String,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_day_count: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub court_state: BTreeMap<String, CourtPhase>,
}

impl PollingTask {
    /// Builds a task with fresh detection state from a validated wire spec.
    pub fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            tournament_key: spec.tournament_key.clone(),
            tournament_name: spec.tournament_name.clone(),
            kind: spec.kind,
            previous_day_count: None,
            court_state: BTreeMap::new(),
        }
    }

    /// True once at least one court is tracked and every tracked court has
    /// finished its last match. Untracked courts never block termination.
    pub fn all_courts_complete(&self) -> bool {
        !self.court_state.is_empty()
            && self
                .court_state
                .values()
                .all(|phase| *phase == CourtPhase::Complete)
    }
}
