//! SQLite persistence for courtwatch-daemon.
//!
//! This is the single-writer store backing the daemon: one tasks table keyed
//! by task id. The detection state rides in a JSON column so the schema stays
//! stable as detectors evolve.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use watch_core::PollingTask;

pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create store directory: {}", err))?;
        }
        self.with_connection(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tasks (\
                    id TEXT PRIMARY KEY,\
                    tournament_key TEXT NOT NULL,\
                    tournament_name TEXT NOT NULL,\
                    kind TEXT NOT NULL,\
                    state TEXT NOT NULL,\
                    updated_at TEXT NOT NULL\
                )",
                [],
            )
            .map_err(|err| format!("Failed to create tasks table: {}", err))?;
            Ok(())
        })
    }

    /// Inserts or replaces a task by id. A replace resets the row to whatever
    /// state the caller holds, which is how START performs a clean restart.
    pub fn put(&self, task: &PollingTask) -> Result<(), String> {
        let state = encode_state(task)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, tournament_key, tournament_name, kind, state, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET \
                    tournament_key = excluded.tournament_key, \
                    tournament_name = excluded.tournament_name, \
                    kind = excluded.kind, \
                    state = excluded.state, \
                    updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.tournament_key,
                    task.tournament_name,
                    task.kind.as_str(),
                    state,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|err| format!("Failed to upsert task: {}", err))?;
            Ok(())
        })
    }

    /// Fenced write used by detectors: the state only lands while the task
    /// still exists, so a cycle racing a STOP cannot resurrect a deleted row.
    /// Returns whether the write landed.
    pub fn update_state(&self, task: &PollingTask) -> Result<bool, String> {
        let state = encode_state(task)?;
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET state = ?2, updated_at = ?3 WHERE id = ?1",
                    params![task.id, state, Utc::now().to_rfc3339()],
                )
                .map_err(|err| format!("Failed to update task state: {}", err))?;
            Ok(changed > 0)
        })
    }

    pub fn delete(&self, id: &str) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
                .map_err(|err| format!("Failed to delete task: {}", err))?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<PollingTask>, String> {
        let state: Option<String> = self.with_connection(|conn| {
            conn.query_row("SELECT state FROM tasks WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| format!("Failed to query task: {}", err))
        })?;
        state.map(|raw| decode_state(&raw)).transpose()
    }

    pub fn get_all(&self) -> Result<Vec<PollingTask>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT state FROM tasks ORDER BY id ASC")
                .map_err(|err| format!("Failed to prepare tasks query: {}", err))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|err| format!("Failed to read task rows: {}", err))?;

            let mut tasks = Vec::new();
            for row in rows {
                let raw = row.map_err(|err| format!("Failed to decode task row: {}", err))?;
                tasks.push(decode_state(&raw)?);
            }
            Ok(tasks)
        })
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let conn = Connection::open(&self.path)
            .map_err(|err| format!("Failed to open task store: {}", err))?;
        operation(&conn)
    }
}

fn encode_state(task: &PollingTask) -> Result<String, String> {
    serde_json::to_string(task).map_err(|err| format!("Failed to serialize task state: {}", err))
}

fn decode_state(raw: &str) -> Result<PollingTask, String> {
    serde_json::from_str(raw).map_err(|err| format!("Failed to parse task state: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtwatch_daemon_protocol::{TaskKind, TaskSpec};
    use watch_core::CourtPhase;

    fn open_store(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::new(dir.path().join("daemon").join("tasks.db")).expect("store init")
    }

    fn last_match_task() -> PollingTask {
        PollingTask::from_spec(&TaskSpec::new("key-1", "ITF Osijek Open", TaskKind::LastMatch))
    }

    #[test]
    fn put_and_get_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);

        let mut task = last_match_task();
        task.court_state
            .insert("Court 1".to_string(), CourtPhase::GoingOut);
        store.put(&task).expect("put task");

        let loaded = store.get(&task.id).expect("get task").expect("task exists");
        assert_eq!(loaded, task);
    }

    #[test]
    fn put_replaces_existing_state() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);

        let mut task = last_match_task();
        task.court_state
            .insert("Court 1".to_string(), CourtPhase::Complete);
        store.put(&task).expect("put task");

        // A clean restart persists the task with fresh detection state.
        let fresh = last_match_task();
        store.put(&fresh).expect("replace task");

        let loaded = store.get(&fresh.id).expect("get task").expect("task exists");
        assert!(loaded.court_state.is_empty());
    }

    #[test]
    fn update_state_lands_on_existing_task() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);

        let mut task = last_match_task();
        store.put(&task).expect("put task");

        task.court_state
            .insert("Court 2".to_string(), CourtPhase::GoingOut);
        assert!(store.update_state(&task).expect("update state"));

        let loaded = store.get(&task.id).expect("get task").expect("task exists");
        assert_eq!(
            loaded.court_state.get("Court 2"),
            Some(&CourtPhase::GoingOut)
        );
    }

    #[test]
    fn update_state_is_fenced_after_delete() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);

        let mut task = last_match_task();
        store.put(&task).expect("put task");
        store.delete(&task.id).expect("delete task");

        task.court_state
            .insert("Court 1".to_string(), CourtPhase::GoingOut);
        assert!(!store.update_state(&task).expect("update state"));
        assert!(store.get(&task.id).expect("get task").is_none());
    }

    #[test]
    fn delete_is_a_noop_for_missing_ids() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);
        store.delete("never-stored").expect("delete absent task");
    }

    #[test]
    fn get_all_returns_tasks_in_id_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = open_store(&dir);

        let b = PollingTask::from_spec(&TaskSpec::new("b", "B", TaskKind::ScheduleRelease));
        let a = PollingTask::from_spec(&TaskSpec::new("a", "A", TaskKind::LastMatch));
        store.put(&b).expect("put b");
        store.put(&a).expect("put a");

        let ids: Vec<String> = store
            .get_all()
            .expect("get all")
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(ids, vec!["a-last_match", "b-schedule_release"]);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("daemon").join("tasks.db");

        let task = last_match_task();
        {
            let store = TaskStore::new(path.clone()).expect("store init");
            store.put(&task).expect("put task");
        }

        let reopened = TaskStore::new(path).expect("store reopen");
        let loaded = reopened
            .get(&task.id)
            .expect("get task")
            .expect("task exists");
        assert_eq!(loaded.id, task.id);
    }
}
