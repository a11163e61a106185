//! Client helper for sending control commands to the courtwatch daemon.
//!
//! The daemon is the only writer. Failures are surfaced to the caller; one
//! retry covers the daemon restarting between attempts, and the retry reuses
//! the same request id so the daemon can tell it is not a new command.

use courtwatch_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use rand::RngCore;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "COURTWATCH_SOCKET";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

pub fn send_command(
    method: Method,
    params: Option<serde_json::Value>,
) -> Result<Response, String> {
    let request_id = make_request_id();
    let build_request = || Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(request_id.clone()),
        params: params.clone(),
    };

    match send_request(build_request()) {
        Ok(response) => Ok(response),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send command to daemon; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(build_request()).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, "Retry failed sending command to daemon");
                retry_err
            })
        }
    }
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    watch_core::config::socket_path().ok_or_else(|| "Home directory not found".to_string())
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{:x}",
        chrono::Utc::now().timestamp_millis(),
        random.next_u64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};
    use std::time::Instant;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        key: &'static str,
        prior: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prior = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prior }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prior {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    fn read_request_id(stream: &mut UnixStream) -> Option<String> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.contains(&b'\n') {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }

        let newline_index = buffer.iter().position(|b| *b == b'\n');
        let request_bytes = match newline_index {
            Some(index) => &buffer[..index],
            None => buffer.as_slice(),
        };
        let request: Request = serde_json::from_slice(request_bytes).ok()?;
        request.id
    }

    fn write_response(stream: &mut UnixStream, response: Response) {
        let mut payload = serde_json::to_vec(&response).unwrap();
        payload.push(b'\n');
        let _ = stream.write_all(&payload);
    }

    #[test]
    fn send_command_returns_the_daemon_response() {
        let _guard = env_lock();

        let socket_dir = tempfile::tempdir().unwrap();
        let socket_path = socket_dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = read_request_id(&mut stream);
                write_response(
                    &mut stream,
                    Response::ok(None, serde_json::json!({ "accepted": true })),
                );
            }
        });

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let response = send_command(Method::ResumeAll, None).expect("send command");
        assert!(response.ok);

        server.join().unwrap();
    }

    #[test]
    fn send_command_retries_after_lost_response_with_same_request_id() {
        let _guard = env_lock();

        let socket_dir = tempfile::tempdir().unwrap();
        let socket_path = socket_dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        listener.set_nonblocking(true).unwrap();

        let attempt_ids: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let attempt_ids_clone = Arc::clone(&attempt_ids);
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let server = std::thread::spawn(move || {
            let start = Instant::now();
            let mut handled = 0;
            while handled < 2 && start.elapsed() < Duration::from_secs(5) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        handled += 1;
                        attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                        let request_id = read_request_id(&mut stream);
                        attempt_ids_clone.lock().unwrap().push(request_id);

                        // Drop the first connection without responding.
                        if handled == 2 {
                            write_response(
                                &mut stream,
                                Response::ok(None, serde_json::json!({ "accepted": true })),
                            );
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let response = send_command(Method::Sweep, None).expect("send command");
        assert!(response.ok);

        server.join().unwrap();

        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
        let ids = attempt_ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1], "retry must reuse the same request id");
    }

    #[test]
    fn missing_daemon_is_an_error() {
        let _guard = env_lock();

        let socket_dir = tempfile::tempdir().unwrap();
        let socket_path = socket_dir.path().join("absent.sock");
        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());

        assert!(send_command(Method::GetHealth, None).is_err());
    }
}
