//! courtwatch-ctl: control CLI for the courtwatch daemon.
//!
//! The foreground application uses these commands to start and stop
//! monitoring; an external timer (cron, systemd) can invoke `sweep` as a
//! coarse backstop for periods when the daemon's own timers were not running.
//!
//! ## Subcommands
//!
//! - `start` / `stop`: enable or disable one monitoring task for a tournament
//! - `resume`: restart loops for every stored task
//! - `sweep`: run one poll pass over all stored tasks
//! - `health` / `tasks`: daemon diagnostics

mod daemon_client;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use courtwatch_daemon_protocol::{task_id, Method, Response, TaskKind, TaskSpec};

#[derive(Parser)]
#[command(name = "courtwatch-ctl")]
#[command(about = "Courtwatch tournament monitor control")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    /// Notify when the order of play is released
    ScheduleRelease,
    /// Notify when the last match on each court goes out and finishes
    LastMatch,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::ScheduleRelease => TaskKind::ScheduleRelease,
            KindArg::LastMatch => TaskKind::LastMatch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring a tournament
    Start {
        /// Upstream tournament key
        #[arg(long)]
        tournament_key: String,

        /// Display name used in notifications
        #[arg(long)]
        tournament_name: String,

        #[arg(long, value_enum)]
        kind: KindArg,
    },

    /// Stop monitoring a tournament
    Stop {
        /// Upstream tournament key
        #[arg(long)]
        tournament_key: String,

        #[arg(long, value_enum)]
        kind: KindArg,
    },

    /// Restart polling loops for every stored task
    Resume,

    /// Run one poll pass over all stored tasks
    Sweep,

    /// Daemon health snapshot
    Health,

    /// Stored tasks and their loop status
    Tasks,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        tracing::error!(error = %err, "courtwatch-ctl failed");
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Start {
            tournament_key,
            tournament_name,
            kind,
        } => {
            let spec = TaskSpec::new(&tournament_key, &tournament_name, kind.into());
            let params = serde_json::to_value(&spec)
                .map_err(|err| format!("Failed to serialize task: {}", err))?;
            expect_ack(daemon_client::send_command(
                Method::StartPolling,
                Some(params),
            )?)?;
            println!("Started {}", spec.id);
            Ok(())
        }
        Commands::Stop {
            tournament_key,
            kind,
        } => {
            let id = task_id(&tournament_key, kind.into());
            expect_ack(daemon_client::send_command(
                Method::StopPolling,
                Some(serde_json::json!({ "id": id })),
            )?)?;
            println!("Stopped {}", id);
            Ok(())
        }
        Commands::Resume => {
            let response = expect_ack(daemon_client::send_command(Method::ResumeAll, None)?)?;
            let resumed = response
                .data
                .as_ref()
                .and_then(|data| data.get("resumed"))
                .and_then(|value| value.as_u64())
                .unwrap_or(0);
            println!("Resumed {} task(s)", resumed);
            Ok(())
        }
        Commands::Sweep => {
            expect_ack(daemon_client::send_command(Method::Sweep, None)?)?;
            println!("Sweep requested");
            Ok(())
        }
        Commands::Health => print_data(daemon_client::send_command(Method::GetHealth, None)?),
        Commands::Tasks => print_data(daemon_client::send_command(Method::GetTasks, None)?),
    }
}

fn expect_ack(response: Response) -> Result<Response, String> {
    if response.ok {
        Ok(response)
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}

fn print_data(response: Response) -> Result<(), String> {
    let response = expect_ack(response)?;
    let data = response.data.unwrap_or(serde_json::Value::Null);
    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|err| format!("Failed to render response: {}", err))?;
    println!("{}", rendered);
    Ok(())
}
