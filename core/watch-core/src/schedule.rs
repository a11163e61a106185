//! Normalized upstream schedule shapes.
//!
//! The upstream API names the same logical collections differently across
//! calls, so all alias handling lives here and the detectors only ever see
//! one canonical shape. Entries without a usable id or name are dropped.

use chrono::NaiveDate;
use serde_json::Value;

/// One published schedule day for a tournament.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDay {
    pub id: String,
    pub date: Option<String>,
}

/// The match listing for one court on one day, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtSchedule {
    pub court: String,
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchRecord {
    pub status: String,
    pub score_a: Option<String>,
    pub score_b: Option<String>,
}

const DAY_LIST_ALIASES: [&str; 3] = ["items", "days", "scheduleDays"];
const DAY_ID_ALIASES: [&str; 3] = ["scheduleDayId", "dayId", "id"];
const DAY_DATE_ALIASES: [&str; 3] = ["date", "scheduleDate", "dayDate"];
const COURT_LIST_ALIASES: [&str; 3] = ["items", "courts", "courtSchedules"];
const COURT_NAME_ALIASES: [&str; 2] = ["courtName", "name"];
const MATCH_LIST_ALIASES: [&str; 2] = ["matches", "items"];
const STATUS_ALIASES: [&str; 3] = ["matchStatus", "status", "statusCode"];
const SCORE_A_ALIASES: [&str; 3] = ["scoreTeamA", "teamAScore", "homeScore"];
const SCORE_B_ALIASES: [&str; 3] = ["scoreTeamB", "teamBScore", "awayScore"];

pub fn normalize_days(payload: &Value) -> Vec<ScheduleDay> {
    collection(payload, &DAY_LIST_ALIASES)
        .map(|entries| entries.iter().filter_map(day_entry).collect())
        .unwrap_or_default()
}

pub fn normalize_courts(payload: &Value) -> Vec<CourtSchedule> {
    collection(payload, &COURT_LIST_ALIASES)
        .map(|entries| entries.iter().filter_map(court_entry).collect())
        .unwrap_or_default()
}

/// Picks the day to inspect: the one matching `today` (date-only), else the
/// last listed day, which the upstream publishes as the most recent.
pub fn select_day(days: &[ScheduleDay], today: NaiveDate) -> Option<&ScheduleDay> {
    let today = today.format("%Y-%m-%d").to_string();
    days.iter()
        .find(|day| {
            day.date
                .as_deref()
                .map(|date| date.starts_with(&today))
                .unwrap_or(false)
        })
        .or_else(|| days.last())
}

fn day_entry(entry: &Value) -> Option<ScheduleDay> {
    let id = scalar_field(entry, &DAY_ID_ALIASES)?;
    Some(ScheduleDay {
        id,
        date: string_field(entry, &DAY_DATE_ALIASES),
    })
}

fn court_entry(entry: &Value) -> Option<CourtSchedule> {
    let court = string_field(entry, &COURT_NAME_ALIASES)?;
    let matches = collection(entry, &MATCH_LIST_ALIASES)
        .map(|entries| entries.iter().map(match_entry).collect())
        .unwrap_or_default();
    Some(CourtSchedule { court, matches })
}

fn match_entry(entry: &Value) -> MatchRecord {
    MatchRecord {
        status: string_field(entry, &STATUS_ALIASES).unwrap_or_default(),
        score_a: scalar_field(entry, &SCORE_A_ALIASES),
        score_b: scalar_field(entry, &SCORE_B_ALIASES),
    }
}

/// Resolves a collection that may be the payload itself or live under any of
/// the known aliases.
fn collection<'a>(payload: &'a Value, aliases: &[&str]) -> Option<&'a Vec<Value>> {
    if let Value::Array(entries) = payload {
        return Some(entries);
    }
    aliases
        .iter()
        .find_map(|alias| payload.get(alias).and_then(Value::as_array))
}

fn string_field(entry: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|alias| entry.get(alias).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Like `string_field`, but also accepts numeric values (the upstream mixes
/// numeric and string ids and scores).
fn scalar_field(entry: &Value, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match entry.get(alias) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}
