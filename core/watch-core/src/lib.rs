//! # watch-core
//!
//! Core library for courtwatch, shared by the daemon and its clients.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The daemon wraps calls in
//!   its own worker threads.
//! - **Not thread-safe**: Callers provide their own synchronization.
//! - **Graceful degradation**: A missing config file yields defaults, not
//!   errors; malformed upstream entries are dropped, not fatal.

pub mod config;
pub mod error;
pub mod schedule;
pub mod status;
pub mod task;

pub use config::WatchConfig;
pub use error::{Result, WatchError};
pub use schedule::{
    normalize_courts, normalize_days, select_day, CourtSchedule, MatchRecord, ScheduleDay,
};
pub use status::{classify_status, format_score, next_phase, MatchPhase};
pub use task::{CourtPhase, PollingTask};
