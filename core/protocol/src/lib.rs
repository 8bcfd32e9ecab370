//! IPC protocol types and validation for the tabtrack reporter.
//!
//! This crate is shared by the reporter and its clients to prevent schema
//! drift. Two kinds of messages travel over the socket: control requests from
//! the UI (`{"action": ...}`) and platform notifications forwarded by the
//! browser bridge (`{"event": ...}`). The reporter remains the authority on
//! validation, but clients reuse the same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// The fixed control vocabulary understood by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    StartTracking,
    StopTracking,
    GetTracking,
    CheckLogin,
    Login,
    IsTracking,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::StartTracking,
        Action::StopTracking,
        Action::GetTracking,
        Action::CheckLogin,
        Action::Login,
        Action::IsTracking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::StartTracking => "START_TRACKING",
            Action::StopTracking => "STOP_TRACKING",
            Action::GetTracking => "GET_TRACKING",
            Action::CheckLogin => "CHECK_LOGIN",
            Action::Login => "LOGIN",
            Action::IsTracking => "IS_TRACKING",
        }
    }

    /// Maps a wire action name to the closed vocabulary. Unknown names are
    /// `None`; callers drop those requests without answering.
    pub fn from_wire(value: &str) -> Option<Self> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
    }

    /// Whether the answer arrives after a `pending` acknowledgment.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Action::Login)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
}

impl ControlRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            payload: None,
            id: None,
            protocol_version: Some(PROTOCOL_VERSION),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A validated control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    StartTracking,
    StopTracking,
    GetTracking,
    CheckLogin,
    IsTracking,
    Login(LoginPayload),
}

impl Control {
    pub fn action(&self) -> Action {
        match self {
            Control::StartTracking => Action::StartTracking,
            Control::StopTracking => Action::StopTracking,
            Control::GetTracking => Action::GetTracking,
            Control::CheckLogin => Action::CheckLogin,
            Control::IsTracking => Action::IsTracking,
            Control::Login(_) => Action::Login,
        }
    }
}

/// Validates a control request. `Ok(None)` means the action is not part of
/// the vocabulary.
pub fn parse_control(request: &ControlRequest) -> Result<Option<Control>, ErrorInfo> {
    if let Some(version) = request.protocol_version {
        if version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                format!("unsupported protocol version {}", version),
            ));
        }
    }

    let Some(action) = Action::from_wire(&request.action) else {
        return Ok(None);
    };

    let control = match action {
        Action::StartTracking => Control::StartTracking,
        Action::StopTracking => Control::StopTracking,
        Action::GetTracking => Control::GetTracking,
        Action::CheckLogin => Control::CheckLogin,
        Action::IsTracking => Control::IsTracking,
        Action::Login => {
            let payload = request
                .payload
                .clone()
                .ok_or_else(|| ErrorInfo::new("invalid_params", "login payload is required"))?;
            Control::Login(parse_login(payload)?)
        }
    };

    Ok(Some(control))
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginPayload {
    pub server_name: String,
    pub username: String,
    pub password: String,
    pub device_name: String,
}

impl fmt::Debug for LoginPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginPayload")
            .field("server_name", &self.server_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("device_name", &self.device_name)
            .finish()
    }
}

impl LoginPayload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_text(&self.server_name, "serverName")?;
        require_text(&self.username, "username")?;
        require_text(&self.password, "password")?;
        require_text(&self.device_name, "deviceName")?;
        Ok(())
    }
}

pub fn parse_login(payload: Value) -> Result<LoginPayload, ErrorInfo> {
    let login: LoginPayload = serde_json::from_value(payload).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("login payload is invalid: {}", err),
        )
    })?;
    login.validate()?;
    Ok(login)
}

/// Browser notifications forwarded by the bridge. Window ids below zero mean
/// that no browser window has focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformNotification {
    TabUpdated {
        tab_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<i64>,
        url: String,
    },
    TabActivated {
        tab_id: i64,
        window_id: i64,
    },
    WindowFocusChanged {
        window_id: i64,
    },
    Snapshot {
        windows: Vec<WindowView>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowView {
    pub id: i64,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub tabs: Vec<TabView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabView {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

impl PlatformNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformNotification::TabUpdated { .. } => "tab_updated",
            PlatformNotification::TabActivated { .. } => "tab_activated",
            PlatformNotification::WindowFocusChanged { .. } => "window_focus_changed",
            PlatformNotification::Snapshot { .. } => "snapshot",
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            PlatformNotification::TabUpdated {
                tab_id,
                window_id,
                url,
            } => {
                require_tab_id(*tab_id)?;
                if let Some(window_id) = window_id {
                    require_window_id(*window_id)?;
                }
                require_text(url, "url")?;
            }
            PlatformNotification::TabActivated { tab_id, window_id } => {
                require_tab_id(*tab_id)?;
                require_window_id(*window_id)?;
            }
            // Negative ids are meaningful here: no window has focus.
            PlatformNotification::WindowFocusChanged { .. } => {}
            PlatformNotification::Snapshot { windows } => {
                let focused = windows.iter().filter(|window| window.focused).count();
                if focused > 1 {
                    return Err(ErrorInfo::new(
                        "invalid_params",
                        "snapshot may mark at most one window as focused",
                    ));
                }
                for window in windows {
                    require_window_id(window.id)?;
                    for tab in &window.tabs {
                        require_tab_id(tab.id)?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn parse_notification(value: Value) -> Result<PlatformNotification, ErrorInfo> {
    let notification: PlatformNotification = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("platform notification is invalid: {}", err),
        )
    })?;
    notification.validate()?;
    Ok(notification)
}

/// Anything the reporter accepts on its socket.
#[derive(Debug, Clone)]
pub enum Envelope {
    Control(ControlRequest),
    Platform(PlatformNotification),
}

pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope, ErrorInfo> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;

    let Some(object) = value.as_object() else {
        return Err(ErrorInfo::new(
            "invalid_request",
            "request must be a JSON object",
        ));
    };

    if object.contains_key("action") {
        let request: ControlRequest = serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_request",
                format!("control request is malformed: {}", err),
            )
        })?;
        return Ok(Envelope::Control(request));
    }

    if object.contains_key("event") {
        return parse_notification(value).map(Envelope::Platform);
    }

    Err(ErrorInfo::new(
        "invalid_request",
        "request needs an action or an event",
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Set on the interim line of a deferred action; the final answer follows
    /// on the same connection.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            pending: false,
            data: Some(data),
            error: None,
        }
    }

    /// Success without a payload.
    pub fn ack(id: Option<String>) -> Self {
        Self {
            ok: true,
            id,
            pending: false,
            data: None,
            error: None,
        }
    }

    pub fn pending(id: Option<String>) -> Self {
        Self {
            ok: true,
            id,
            pending: true,
            data: None,
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            pending: false,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            pending: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.data.as_ref().and_then(Value::as_bool)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn require_text(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_tab_id(tab_id: i64) -> Result<(), ErrorInfo> {
    if tab_id < 0 {
        return Err(ErrorInfo::new("invalid_tab_id", "tab_id must be non-negative"));
    }
    Ok(())
}

fn require_window_id(window_id: i64) -> Result<(), ErrorInfo> {
    if window_id < 0 {
        return Err(ErrorInfo::new(
            "invalid_window_id",
            "window_id must be non-negative",
        ));
    }
    Ok(())
}
