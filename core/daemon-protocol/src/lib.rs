//! IPC protocol types and validation for courtwatch-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests. Commands carry no semantic reply;
//! the daemon only acknowledges receipt at the transport layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetTasks,
    StartPolling,
    StopPolling,
    ResumeAll,
    Sweep,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// What a polling task watches for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ScheduleRelease,
    LastMatch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ScheduleRelease => "schedule_release",
            TaskKind::LastMatch => "last_match",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitoring task as submitted by the foreground client. The task id is
/// derived from the tournament key and kind so a tournament can carry at most
/// one task of each kind.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub id: String,
    pub tournament_key: String,
    pub tournament_name: String,
    pub kind: TaskKind,
}

impl TaskSpec {
    pub fn new(tournament_key: &str, tournament_name: &str, kind: TaskKind) -> Self {
        Self {
            id: task_id(tournament_key, kind),
            tournament_key: tournament_key.to_string(),
            tournament_name: tournament_name.to_string(),
            kind,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.id, "id")?;
        require_string(&self.tournament_key, "tournament_key")?;
        require_string(&self.tournament_name, "tournament_name")?;

        if self.id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_id",
                "id must be 128 characters or fewer",
            ));
        }

        if self.id != task_id(&self.tournament_key, self.kind) {
            return Err(ErrorInfo::new(
                "invalid_id",
                "id must be \"{tournament_key}-{kind}\"",
            ));
        }

        Ok(())
    }
}

/// Composes the canonical task id for a tournament key and kind.
pub fn task_id(tournament_key: &str, kind: TaskKind) -> String {
    format!("{}-{}", tournament_key, kind.as_str())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopParams {
    pub id: String,
}

impl StopParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.id, "id")
    }
}

pub fn parse_task(params: Value) -> Result<TaskSpec, ErrorInfo> {
    let spec: TaskSpec = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("task payload is invalid JSON: {}", err),
        )
    })?;
    spec.validate()?;
    Ok(spec)
}

pub fn parse_stop(params: Value) -> Result<StopParams, ErrorInfo> {
    let stop: StopParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("stop payload is invalid JSON: {}", err),
        )
    })?;
    stop.validate()?;
    Ok(stop)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> TaskSpec {
        TaskSpec::new("M-ITF-CRO-2026-001", "ITF Osijek Open", TaskKind::LastMatch)
    }

    #[test]
    fn new_composes_id_from_key_and_kind() {
        let spec = base_spec();
        assert_eq!(spec.id, "M-ITF-CRO-2026-001-last_match");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn validates_schedule_release_spec() {
        let spec = TaskSpec::new("W-ITF-GBR-2026-012", "ITF Nottingham", TaskKind::ScheduleRelease);
        assert_eq!(spec.id, "W-ITF-GBR-2026-012-schedule_release");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_empty_tournament_key() {
        let mut spec = base_spec();
        spec.tournament_key = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_id() {
        let mut spec = base_spec();
        spec.id = "something-else".to_string();
        let err = spec.validate().expect_err("mismatched id must fail");
        assert_eq!(err.code, "invalid_id");
    }

    #[test]
    fn rejects_long_id() {
        let mut spec = base_spec();
        spec.tournament_key = "k".repeat(200);
        spec.id = task_id(&spec.tournament_key, spec.kind);
        let err = spec.validate().expect_err("long id must fail");
        assert_eq!(err.code, "invalid_id");
    }

    #[test]
    fn parse_task_rejects_unknown_fields() {
        let params = serde_json::json!({
            "id": "key-last_match",
            "tournament_key": "key",
            "tournament_name": "name",
            "kind": "last_match",
            "extra": true,
        });
        let err = parse_task(params).expect_err("unknown field must fail");
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn parse_stop_requires_id() {
        let err = parse_stop(serde_json::json!({ "id": "  " })).expect_err("blank id must fail");
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn task_kind_round_trips_through_wire_names() {
        let kind: TaskKind = serde_json::from_str("\"schedule_release\"").expect("parse kind");
        assert_eq!(kind, TaskKind::ScheduleRelease);
        assert_eq!(
            serde_json::to_string(&TaskKind::LastMatch).expect("serialize kind"),
            "\"last_match\""
        );
    }
}
