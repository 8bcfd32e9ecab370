use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tabtrack_protocol::{Action, ControlRequest, Response};

struct ReporterGuard {
    child: Child,
}

impl Drop for ReporterGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn temp_home(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in("/tmp")
        .expect("failed to create temp HOME")
}

fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = std::fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

fn spawn_reporter(home: &Path) -> ReporterGuard {
    let dir = home.join(".tabtrack");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(
        dir.join("reporter.toml"),
        "[platform]\nos = \"mac\"\n\n[ipc]\nread_timeout_secs = 1\n",
    )
    .expect("write reporter config");

    let child = Command::new(env!("CARGO_BIN_EXE_tabtrack-reporter"))
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn tabtrack-reporter");
    ReporterGuard { child }
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".tabtrack").join("reporter.sock")
}

fn journal_path(home: &Path) -> PathBuf {
    home.join(".tabtrack").join("reporter").join("journal.db")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for reporter socket at {}", path.display());
}

fn read_responses(stream: UnixStream) -> Vec<Response> {
    BufReader::new(stream)
        .lines()
        .map(|line| line.expect("Failed to read response line"))
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(&line).expect("Failed to parse response JSON"))
        .collect()
}

fn send_raw(socket: &Path, payload: &[u8]) -> Vec<Response> {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to reporter socket");
    stream
        .set_read_timeout(Some(Duration::from_secs(15)))
        .expect("set read timeout");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    read_responses(stream)
}

fn send(socket: &Path, message: &Value) -> Vec<Response> {
    let mut payload = serde_json::to_vec(message).expect("Failed to serialize request");
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn error_code(responses: &[Response]) -> Option<&str> {
    responses
        .first()
        .and_then(|response| response.error.as_ref())
        .map(|err| err.code.as_str())
}

fn check_login(socket: &Path) -> Option<bool> {
    let request = serde_json::to_value(ControlRequest::new(Action::CheckLogin)).expect("to JSON");
    send(socket, &request).first().and_then(Response::as_bool)
}

#[test]
fn reporter_rejects_malformed_requests_and_stays_healthy() {
    let home = temp_home("tabtrack-hardening-malformed");
    if !can_bind_socket(home.path()) {
        eprintln!("Skipping hardening test: unix socket binding not permitted.");
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_reporter(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    assert_eq!(error_code(&send_raw(&socket, b"{not json\n")), Some("invalid_json"));
    assert_eq!(error_code(&send_raw(&socket, b"[1, 2]\n")), Some("invalid_request"));
    assert_eq!(error_code(&send_raw(&socket, b"   \n")), Some("empty_request"));
    assert_eq!(
        error_code(&send(&socket, &json!({"hello": "world"}))),
        Some("invalid_request")
    );
    assert_eq!(
        error_code(&send(
            &socket,
            &json!({"action": "GET_TRACKING", "protocol_version": 99})
        )),
        Some("protocol_mismatch")
    );
    assert_eq!(
        error_code(&send(
            &socket,
            &json!({"action": "LOGIN", "payload": {
                "serverName": "srv:4201",
                "username": "",
                "password": "p",
                "deviceName": "dev"
            }})
        )),
        Some("missing_field")
    );
    assert_eq!(
        error_code(&send(
            &socket,
            &json!({"event": "tab_activated", "tab_id": -4, "window_id": 1})
        )),
        Some("invalid_tab_id")
    );

    assert_eq!(check_login(&socket), Some(false));
}

#[test]
fn reporter_drops_unknown_actions_without_answering() {
    let home = temp_home("tabtrack-hardening-unknown");
    if !can_bind_socket(home.path()) {
        eprintln!("Skipping hardening test: unix socket binding not permitted.");
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_reporter(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let responses = send(&socket, &json!({"action": "OPEN_DASHBOARD"}));
    assert!(responses.is_empty(), "unknown actions get no response");

    let responses = send(&socket, &json!({"action": "GET_TRACKING", "id": "after"}));
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id.as_deref(), Some("after"));
    assert_eq!(responses[0].as_bool(), Some(false));
}

#[test]
fn reporter_idle_connection_returns_read_timeout_error() {
    let home = temp_home("tabtrack-hardening-timeout");
    if !can_bind_socket(home.path()) {
        eprintln!("Skipping timeout hardening test: unix socket binding not permitted.");
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_reporter(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let idle = UnixStream::connect(&socket).expect("failed to connect idle stream");
    idle.set_read_timeout(Some(Duration::from_secs(15)))
        .expect("set read timeout");
    let responses = read_responses(idle);
    assert_eq!(error_code(&responses), Some("read_timeout"));
}

#[test]
fn reporter_restart_restores_login_and_closes_open_span() {
    let home = temp_home("tabtrack-hardening-restart");
    if !can_bind_socket(home.path()) {
        eprintln!("Skipping restart test: unix socket binding not permitted.");
        return;
    }

    let socket = socket_path(home.path());
    {
        let _guard = spawn_reporter(home.path());
        wait_for_socket(&socket, Duration::from_secs(5));

        let login = ControlRequest::new(Action::Login).with_payload(json!({
            "serverName": "localhost:4201",
            "username": "u",
            "password": "hunter2",
            "deviceName": "dev"
        }));
        let responses = send(&socket, &serde_json::to_value(login).expect("to JSON"));
        assert_eq!(responses.last().and_then(Response::as_bool), Some(true));

        let start = serde_json::to_value(ControlRequest::new(Action::StartTracking))
            .expect("to JSON");
        send(&socket, &start);
        let is_tracking =
            serde_json::to_value(ControlRequest::new(Action::IsTracking)).expect("to JSON");
        let deadline = Instant::now() + Duration::from_secs(5);
        while send(&socket, &is_tracking).first().and_then(Response::as_bool) != Some(true) {
            assert!(Instant::now() < deadline, "engine never started tracking");
            sleep(Duration::from_millis(25));
        }
    }

    let _guard = spawn_reporter(home.path());
    let deadline = Instant::now() + Duration::from_secs(5);
    let restored = loop {
        if let Ok(stream) = UnixStream::connect(&socket) {
            drop(stream);
            if let Some(value) = check_login(&socket) {
                break value;
            }
        }
        assert!(Instant::now() < deadline, "restarted reporter never answered");
        sleep(Duration::from_millis(25));
    };
    assert!(restored, "registration survives a restart");

    let conn = rusqlite::Connection::open(journal_path(home.path())).expect("open journal");
    let kinds: Vec<String> = conn
        .prepare("SELECT kind FROM events ORDER BY eid ASC")
        .expect("prepare")
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(kinds, vec!["start".to_string(), "stop".to_string()]);

    let passwords: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM registration WHERE username = 'hunter2' \
             OR device_name = 'hunter2' OR server_name = 'hunter2'",
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(passwords, 0);
}
