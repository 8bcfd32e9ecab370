//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use tabtrack_protocol::LoginPayload;

use crate::engine::{Reply, TrackingEngine};
use crate::platform::{BrowserPlatform, FocusedWindow, Tab, TabId, WindowId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Start,
    Stop,
    SwitchUrl(String),
    Login(LoginPayload),
}

/// Records every call. Replies are answered on the spot unless `hold` is set,
/// in which case they queue up until released.
pub struct ScriptedEngine {
    calls: Vec<EngineCall>,
    pub start_result: bool,
    pub login_result: bool,
    pub registered: bool,
    pub hold: bool,
    held_starts: Vec<Reply<bool>>,
    tracking: bool,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            start_result: true,
            login_result: true,
            registered: false,
            hold: false,
            held_starts: Vec::new(),
            tracking: false,
        }
    }
}

impl ScriptedEngine {
    pub fn failing_start() -> Self {
        Self {
            start_result: false,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.iter().filter(|seen| *seen == call).count()
    }

    pub fn switches(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::SwitchUrl(url) => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Answers the oldest held start.
    pub fn release_start(&mut self, success: bool) {
        if !self.held_starts.is_empty() {
            let reply = self.held_starts.remove(0);
            self.tracking = success;
            reply.send(success);
        }
    }
}

impl TrackingEngine for ScriptedEngine {
    fn start_tracking(&mut self, reply: Reply<bool>) {
        self.calls.push(EngineCall::Start);
        if self.hold {
            self.held_starts.push(reply);
        } else {
            self.tracking = self.start_result;
            reply.send(self.start_result);
        }
    }

    fn stop_tracking(&mut self) {
        self.calls.push(EngineCall::Stop);
        self.tracking = false;
    }

    fn switch_url(&mut self, url: &str) {
        self.calls.push(EngineCall::SwitchUrl(url.to_string()));
    }

    fn login(&mut self, login: LoginPayload, reply: Reply<bool>) {
        self.calls.push(EngineCall::Login(login));
        if self.login_result {
            self.registered = true;
        }
        reply.send(self.login_result);
    }

    fn is_tracking(&self) -> bool {
        self.tracking
    }

    fn is_registered(&self) -> bool {
        self.registered
    }
}

/// A fixed browser: tab URLs, active tabs per window and a last-focused
/// answer.
#[derive(Default)]
pub struct FakePlatform {
    urls: HashMap<TabId, String>,
    active: HashMap<WindowId, Vec<Tab>>,
    last_focused: Option<FocusedWindow>,
}

impl FakePlatform {
    pub fn with_active_tab(mut self, window_id: WindowId, tab_id: TabId, url: &str) -> Self {
        self.urls.insert(tab_id, url.to_string());
        self.active.entry(window_id).or_default().push(Tab {
            id: tab_id,
            window_id,
            url: url.to_string(),
        });
        self
    }

    pub fn with_tab(mut self, tab_id: TabId, url: &str) -> Self {
        self.urls.insert(tab_id, url.to_string());
        self
    }

    pub fn with_focus(mut self, id: WindowId, focused: bool) -> Self {
        self.last_focused = Some(FocusedWindow { id, focused });
        self
    }
}

impl BrowserPlatform for FakePlatform {
    fn tab_url(&self, tab_id: TabId) -> Option<String> {
        self.urls.get(&tab_id).cloned()
    }

    fn active_tabs(&self, window_id: WindowId) -> Vec<Tab> {
        self.active.get(&window_id).cloned().unwrap_or_default()
    }

    fn last_focused_window(&self) -> Option<FocusedWindow> {
        self.last_focused
    }
}

pub fn reply_channel() -> (Reply<bool>, Receiver<bool>) {
    let (tx, rx) = mpsc::channel();
    let reply = Reply::new(move |value| {
        let _ = tx.send(value);
    });
    (reply, rx)
}

pub fn login(server: &str) -> LoginPayload {
    LoginPayload {
        server_name: server.to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
        device_name: "dev".to_string(),
    }
}
