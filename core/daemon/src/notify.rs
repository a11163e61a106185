//! User-visible notifications.
//!
//! Dispatch is fire-and-forget: a failed display is logged by the caller and
//! never rolls back detector state that has already advanced.

use rand::RngCore;
use std::process::Command;

const APP_NAME: &str = "courtwatch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    /// Unique per dispatch so the platform never collapses distinct events.
    pub tag: String,
    /// Opaque payload for the click handler that focuses the app window.
    pub tournament_key: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Desktop notifier backed by the platform's notify-send binary.
#[derive(Debug, Clone, Default)]
pub struct CommandNotifier;

impl Notifier for CommandNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), String> {
        let mut command = Command::new("notify-send");
        command
            .arg(format!("--app-name={}", APP_NAME))
            .arg(format!(
                "--hint=string:x-courtwatch-tag:{}",
                notification.tag
            ))
            .arg(format!(
                "--hint=string:x-courtwatch-tournament:{}",
                notification.tournament_key
            ));
        if let Some(icon) = &notification.icon {
            command.arg(format!("--icon={}", icon));
        }
        command.arg(&notification.title).arg(&notification.body);

        match command.output() {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(format!("notify-send exited with {}", output.status)),
            Err(err) => Err(format!("Failed to run notify-send: {}", err)),
        }
    }
}

/// Dispatch tag: task id plus dispatch time plus a random suffix.
pub fn make_tag(task_id: &str) -> String {
    let mut random = rand::thread_rng();
    format!(
        "{}-{}-{:x}",
        task_id,
        chrono::Utc::now().timestamp_millis(),
        random.next_u64()
    )
}
