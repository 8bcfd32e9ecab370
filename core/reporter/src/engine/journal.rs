//! Journal engine: the local tracking engine behind the reporter.
//!
//! Calls are queued to a worker thread that owns the SQLite journal, so the
//! event actor never waits on disk. The worker records start/stop spans and
//! the application (URL host) the user switches to while a span is open.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread;
use tabtrack_protocol::LoginPayload;
use tracing::{debug, info, warn};
use url::Url;

use super::store::{EventKind, JournalError, JournalStore, Registration};
use super::{Reply, TrackingEngine};

const UNKNOWN_APP: &str = "Unknown";

enum Op {
    Start(Reply<bool>),
    Stop,
    Switch(String),
    Login(LoginPayload, Reply<bool>),
}

impl Op {
    fn abandon(self) {
        match self {
            Op::Start(reply) | Op::Login(_, reply) => reply.send(false),
            Op::Stop | Op::Switch(_) => {}
        }
    }
}

pub struct JournalEngine {
    ops: Sender<Op>,
    tracking: Arc<AtomicBool>,
    registered: Arc<AtomicBool>,
}

impl JournalEngine {
    pub fn open(path: PathBuf) -> Result<Self, JournalError> {
        let worker = JournalWorker::open(path)?;
        let tracking = Arc::clone(&worker.tracking);
        let registered = Arc::clone(&worker.registered);
        let (ops, queue) = mpsc::channel();

        thread::Builder::new()
            .name("journal".to_string())
            .spawn(move || worker.run(queue))
            .map_err(JournalError::Spawn)?;

        Ok(Self {
            ops,
            tracking,
            registered,
        })
    }

    fn submit(&self, op: Op) {
        if let Err(SendError(op)) = self.ops.send(op) {
            warn!("Journal worker is gone; dropping engine call");
            op.abandon();
        }
    }
}

impl TrackingEngine for JournalEngine {
    fn start_tracking(&mut self, reply: Reply<bool>) {
        self.submit(Op::Start(reply));
    }

    fn stop_tracking(&mut self) {
        self.submit(Op::Stop);
    }

    fn switch_url(&mut self, url: &str) {
        self.submit(Op::Switch(url.to_string()));
    }

    fn login(&mut self, login: LoginPayload, reply: Reply<bool>) {
        self.submit(Op::Login(login, reply));
    }

    fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

struct JournalWorker {
    store: JournalStore,
    tracking: Arc<AtomicBool>,
    registered: Arc<AtomicBool>,
    current_app: Option<String>,
}

impl JournalWorker {
    fn open(path: PathBuf) -> Result<Self, JournalError> {
        let store = JournalStore::new(path)?;

        if store.last_kind()? == Some(EventKind::Start) {
            warn!("Journal has an open span from a previous run; closing it");
            store.append(EventKind::Stop, None)?;
        }

        let registration = store.registration()?;
        if let Some(registration) = &registration {
            info!(
                server = %registration.server_name,
                username = %registration.username,
                device = %registration.device_name,
                registered_at = %registration.registered_at,
                "Restored device registration"
            );
        }

        Ok(Self {
            store,
            tracking: Arc::new(AtomicBool::new(false)),
            registered: Arc::new(AtomicBool::new(registration.is_some())),
            current_app: None,
        })
    }

    fn run(mut self, ops: Receiver<Op>) {
        for op in ops {
            self.apply(op);
        }
        debug!("Journal worker stopped");
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Start(reply) => {
                let started = self.start();
                reply.send(started);
            }
            Op::Stop => self.stop(),
            Op::Switch(url) => self.switch(&url),
            Op::Login(login, reply) => {
                let registered = self.login(&login);
                reply.send(registered);
            }
        }
    }

    fn start(&mut self) -> bool {
        if self.tracking.load(Ordering::SeqCst) {
            debug!("Start requested while already tracking");
            return true;
        }
        if !self.registered.load(Ordering::SeqCst) {
            warn!("Cannot start tracking without a registered device");
            return false;
        }

        match self.store.append(EventKind::Start, None) {
            Ok(eid) => {
                self.tracking.store(true, Ordering::SeqCst);
                self.current_app = None;
                info!(eid, "Tracking span opened");
                true
            }
            Err(err) => {
                warn!(error = %err, "Failed to journal start event");
                false
            }
        }
    }

    fn stop(&mut self) {
        if !self.tracking.load(Ordering::SeqCst) {
            debug!("Stop requested while not tracking");
            return;
        }

        match self.store.append(EventKind::Stop, None) {
            Ok(eid) => info!(eid, "Tracking span closed"),
            Err(err) => warn!(error = %err, "Failed to journal stop event"),
        }
        self.tracking.store(false, Ordering::SeqCst);
        self.current_app = None;
    }

    fn switch(&mut self, url: &str) {
        if !self.tracking.load(Ordering::SeqCst) {
            debug!("Discarding URL switch while not tracking");
            return;
        }

        let app = app_name(url);
        if self.current_app.as_deref() == Some(app.as_str()) {
            return;
        }

        match self.store.append(EventKind::Switch, Some(&app)) {
            Ok(eid) => {
                info!(eid, app = %app, "Switched application");
                self.current_app = Some(app);
            }
            Err(err) => warn!(error = %err, app = %app, "Failed to journal switch event"),
        }
    }

    fn login(&mut self, login: &LoginPayload) -> bool {
        if let Err(reason) = validate_server_name(&login.server_name) {
            warn!(server = %login.server_name, reason, "Rejecting login");
            return false;
        }
        if login.username.trim().is_empty()
            || login.password.is_empty()
            || login.device_name.trim().is_empty()
        {
            warn!("Rejecting login with blank credentials");
            return false;
        }

        let registration = Registration {
            server_name: login.server_name.trim().to_string(),
            username: login.username.trim().to_string(),
            device_name: login.device_name.trim().to_string(),
            registered_at: Utc::now().to_rfc3339(),
        };

        match self.store.save_registration(&registration) {
            Ok(()) => {
                self.registered.store(true, Ordering::SeqCst);
                info!(
                    server = %registration.server_name,
                    device = %registration.device_name,
                    "Device registered"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, "Failed to persist device registration");
                false
            }
        }
    }
}

/// Reduces a URL to the application name the journal records: its host,
/// with the port when one is written in the URL, default ports included.
pub fn app_name(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return UNKNOWN_APP.to_string();
    };

    match (parsed.host_str(), parsed.port().or_else(|| written_port(url))) {
        (Some(host), _) if host.is_empty() => UNKNOWN_APP.to_string(),
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => UNKNOWN_APP.to_string(),
    }
}

/// The port as written in the raw authority. `Url` forgets ports equal to
/// the scheme default.
fn written_port(url: &str) -> Option<u16> {
    let (_, rest) = url.trim().split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);
    let (_, port) = host_port.rsplit_once(':')?;
    port.parse().ok()
}

/// Accepts `host`, `host:port` and `[ipv6]` / `[ipv6]:port`.
fn validate_server_name(server: &str) -> Result<(), &'static str> {
    let server = server.trim();
    let (host, port) = match server.strip_prefix('[') {
        Some(bracketed) => {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or("server host has an unclosed bracket")?;
            let port = match rest {
                "" => None,
                rest => Some(rest.strip_prefix(':').ok_or("server port is invalid")?),
            };
            (host, port)
        }
        None => match server.split_once(':') {
            Some((_, port)) if port.contains(':') => {
                return Err("IPv6 server hosts must be bracketed");
            }
            Some((host, port)) => (host, Some(port)),
            None => (server, None),
        },
    };

    if host.is_empty() {
        return Err("server host is empty");
    }
    match port.map(str::parse::<u16>) {
        None | Some(Ok(1..=u16::MAX)) => Ok(()),
        Some(_) => Err("server port is invalid"),
    }
}
