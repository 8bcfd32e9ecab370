//! tabtrack reporter entrypoint.
//!
//! A single-writer service: a socket listener that validates requests, an
//! event actor that owns all tracking state, a poll timer for platforms with
//! unreliable focus notifications, and the journal engine on its own worker.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tabtrack_protocol::{
    parse_control, parse_envelope, Envelope, ErrorInfo, Response, MAX_REQUEST_BYTES,
};

mod config;
mod control;
mod engine;
mod mirror;
mod platform;
mod poll;
mod reconciler;
mod reporter;
mod session;
#[cfg(test)]
mod test_support;
mod tracking;

use config::ReporterConfig;
use engine::JournalEngine;
use mirror::BrowserMirror;
use platform::PlatformIdentity;
use reporter::{Input, Reporter, ReporterHandle};

const SOCKET_NAME: &str = "reporter.sock";
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match reporter_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve reporter socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare reporter socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind reporter socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "tabtrack reporter started");

    let config = match config::load_runtime_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load reporter config; using defaults");
            ReporterConfig::default()
        }
    };

    let journal_path = match journal_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve journal path");
            std::process::exit(1);
        }
    };

    let engine = match JournalEngine::open(journal_path) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "Failed to open journal engine");
            std::process::exit(1);
        }
    };

    let identity = PlatformIdentity::resolve(config.platform.os.as_deref());
    let reliability = identity.focus_reliability();
    let reporter = Reporter::new(engine, BrowserMirror::default(), identity);
    let handle = reporter.handle();

    if let Err(err) = thread::Builder::new()
        .name("reporter".to_string())
        .spawn(move || reporter.run())
    {
        error!(error = %err, "Failed to spawn reporter actor");
        std::process::exit(1);
    }

    if let Err(err) = poll::spawn(reliability, config.poll_interval(), handle.clone()) {
        warn!(error = %err, "Failed to spawn focus poll thread; relying on notifications");
    }

    let timeouts = Timeouts {
        read: config.read_timeout(),
        reply: config.reply_timeout(),
    };

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handle = handle.clone();
                thread::spawn(move || handle_connection(stream, handle, timeouts));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept reporter connection");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read: Duration,
    reply: Duration,
}

fn init_logging() {
    let debug_enabled = env::var("TABTRACK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn tabtrack_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".tabtrack"))
}

fn reporter_socket_path() -> Result<PathBuf, String> {
    Ok(tabtrack_dir()?.join(SOCKET_NAME))
}

fn journal_db_path() -> Result<PathBuf, String> {
    Ok(tabtrack_dir()?.join("reporter").join("journal.db"))
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

fn handle_connection(mut stream: UnixStream, reporter: ReporterHandle, timeouts: Timeouts) {
    let envelope = match read_request(&mut stream, timeouts.read).and_then(|bytes| parse_envelope(&bytes))
    {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let _ = write_response(&mut stream, &Response::error_with_info(None, err));
            return;
        }
    };

    match envelope {
        Envelope::Platform(notification) => {
            debug!(event = notification.kind(), "Platform notification received");
            let response = if reporter.submit(Input::Platform(notification)) {
                Response::ok(None, serde_json::json!({"accepted": true}))
            } else {
                Response::error(None, "unavailable", "reporter is shutting down")
            };
            let _ = write_response(&mut stream, &response);
        }
        Envelope::Control(request) => {
            let id = request.id.clone();
            let control = match parse_control(&request) {
                Ok(Some(control)) => control,
                Ok(None) => {
                    debug!(action = %request.action, "Dropping unknown action");
                    return;
                }
                Err(err) => {
                    warn!(code = %err.code, action = %request.action, "Rejected control request");
                    let _ = write_response(&mut stream, &Response::error_with_info(id, err));
                    return;
                }
            };

            debug!(action = %control.action(), id = ?id, "Control request received");
            let (responder, answers) = mpsc::channel();
            if !reporter.submit(Input::Control {
                control,
                id: id.clone(),
                responder,
            }) {
                let response = Response::error(id, "unavailable", "reporter is shutting down");
                let _ = write_response(&mut stream, &response);
                return;
            }
            relay_answers(&mut stream, &answers, id, timeouts.reply);
        }
    }
}

/// Writes the actor's answers until a final (non-pending) one has gone out.
fn relay_answers<W: Write>(
    stream: &mut W,
    answers: &mpsc::Receiver<Response>,
    id: Option<String>,
    timeout: Duration,
) {
    loop {
        let response = match answers.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                warn!(id = ?id, "Timed out waiting for the reporter's answer");
                let response =
                    Response::error(id, "reply_timeout", "reporter did not answer in time");
                let _ = write_response(stream, &response);
                return;
            }
            Err(RecvTimeoutError::Disconnected) => {
                let response = Response::error(id, "unavailable", "reporter dropped the request");
                let _ = write_response(stream, &response);
                return;
            }
        };

        if let Err(err) = write_response(stream, &response) {
            debug!(error = %err, "Client went away before the answer");
            return;
        }
        if !response.pending {
            return;
        }
    }
}

fn read_request(stream: &mut UnixStream, timeout: Duration) -> Result<Vec<u8>, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(timeout));

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
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
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

    let line = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            buffer.truncate(index);
            buffer
        }
        None => buffer,
    };

    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    Ok(line)
}

fn write_response<W: Write>(stream: &mut W, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
