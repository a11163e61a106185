//! Courtwatch daemon entrypoint.
//!
//! This is a small, single-writer service that owns tournament monitoring: a
//! socket listener for control commands, a SQLite-backed task store, and one
//! polling loop per task. Commands are one-way in effect; the daemon only
//! acknowledges receipt.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use courtwatch_daemon_protocol::{
    parse_stop, parse_task, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use watch_core::{config, PollingTask, WatchConfig};

mod detector;
mod engine;
mod notify;
mod registry;
mod store;
mod upstream;

use engine::Engine;
use notify::CommandNotifier;
use registry::{resume_all, sweep_all, CycleRunner, TaskRegistry};
use store::TaskStore;
use upstream::HttpScheduleSource;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct Daemon {
    store: Arc<TaskStore>,
    registry: Arc<TaskRegistry>,
    runner: Arc<dyn CycleRunner>,
    poll_interval_secs: u64,
    // Serializes sweep passes; a second sweep arriving mid-pass is dropped.
    sweep_lock: Mutex<()>,
}

fn main() {
    init_logging();

    let watch_config = WatchConfig::load();

    let socket_path = match config::socket_path() {
        Some(path) => path,
        None => {
            error!("Home directory not found; cannot resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Courtwatch daemon started");

    let db_path = match config::db_path() {
        Some(path) => path,
        None => {
            error!("Home directory not found; cannot resolve task store path");
            std::process::exit(1);
        }
    };

    let store = match TaskStore::new(db_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "Failed to initialize task store");
            std::process::exit(1);
        }
    };

    let engine = Engine::new(
        Arc::clone(&store),
        Box::new(HttpScheduleSource::new(&watch_config)),
        Box::new(CommandNotifier),
        watch_config.notify.icon.clone(),
    );
    let runner: Arc<dyn CycleRunner> = Arc::new(engine);
    let registry = Arc::new(TaskRegistry::new(watch_config.poll_interval()));

    let daemon = Arc::new(Daemon {
        store,
        registry,
        runner,
        poll_interval_secs: watch_config.poll_interval_secs,
        sweep_lock: Mutex::new(()),
    });

    let resumed = resume_all(&daemon.store, &daemon.registry, &daemon.runner);
    info!(resumed, "Resumed stored polling tasks");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let daemon = Arc::clone(&daemon);
                thread::spawn(|| handle_connection(stream, daemon));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("COURTWATCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, daemon: Arc<Daemon>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, daemon);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, daemon: Arc<Daemon>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "poll_interval_secs": daemon.poll_interval_secs,
                "active_tasks": daemon.registry.active_count(),
            }),
        ),
        Method::GetTasks => match daemon.store.get_all() {
            Ok(tasks) => {
                let entries: Vec<serde_json::Value> = tasks
                    .iter()
                    .map(|task| {
                        let mut entry = serde_json::to_value(task)
                            .unwrap_or_else(|_| serde_json::json!({ "id": task.id }));
                        if let Some(object) = entry.as_object_mut() {
                            object.insert(
                                "active".to_string(),
                                serde_json::Value::Bool(daemon.registry.is_active(&task.id)),
                            );
                        }
                        entry
                    })
                    .collect();
                tracing::debug!(tasks = entries.len(), "Task snapshot");
                Response::ok(request.id, serde_json::Value::Array(entries))
            }
            Err(err) => Response::error(
                request.id,
                "store_error",
                format!("Failed to fetch tasks: {}", err),
            ),
        },
        Method::StartPolling => {
            let params = match request.params {
                Some(params) => params,
                None => return Response::error(request.id, "invalid_params", "task is required"),
            };
            let spec = match parse_task(params) {
                Ok(spec) => spec,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            let task = PollingTask::from_spec(&spec);
            if let Err(err) = daemon.store.put(&task) {
                warn!(task_id = %task.id, error = %err, "Failed to persist task");
                return Response::error(request.id, "store_error", err);
            }

            daemon.registry.start(&task.id, Arc::clone(&daemon.runner));
            info!(
                task_id = %task.id,
                kind = %task.kind,
                tournament = %task.tournament_name,
                "Started polling task"
            );
            Response::ok(request.id, serde_json::json!({ "accepted": true }))
        }
        Method::StopPolling => {
            let params = match request.params {
                Some(params) => params,
                None => return Response::error(request.id, "invalid_params", "id is required"),
            };
            let stop = match parse_stop(params) {
                Ok(stop) => stop,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            daemon.registry.stop(&stop.id);
            if let Err(err) = daemon.store.delete(&stop.id) {
                warn!(task_id = %stop.id, error = %err, "Failed to delete task");
                return Response::error(request.id, "store_error", err);
            }

            info!(task_id = %stop.id, "Stopped polling task");
            Response::ok(request.id, serde_json::json!({ "accepted": true }))
        }
        Method::ResumeAll => {
            let resumed = resume_all(&daemon.store, &daemon.registry, &daemon.runner);
            info!(resumed, "Resumed stored polling tasks");
            Response::ok(
                request.id,
                serde_json::json!({ "accepted": true, "resumed": resumed }),
            )
        }
        Method::Sweep => {
            // The external trigger is fire-and-forget: acknowledge receipt and
            // run the pass off the connection thread.
            let daemon = Arc::clone(&daemon);
            thread::spawn(move || {
                let Ok(_pass) = daemon.sweep_lock.try_lock() else {
                    tracing::debug!("Skipping sweep; another sweep is in progress");
                    return;
                };
                let tasks = sweep_all(&daemon.store, &daemon.registry, daemon.runner.as_ref());
                info!(tasks, "Sweep pass finished");
            });
            Response::ok(request.id, serde_json::json!({ "accepted": true }))
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
