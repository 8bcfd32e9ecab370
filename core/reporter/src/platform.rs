//! The browser platform as seen by the reporter.
//!
//! Identity is resolved once at startup and turned into a
//! [`FocusNotificationReliability`] strategy; nothing downstream compares OS
//! strings.

use tabtrack_protocol::PlatformNotification;

pub type TabId = i64;
pub type WindowId = i64;

/// Window id reported when no browser window holds focus.
pub const NO_WINDOW: WindowId = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: String,
}

/// Answer to "which window was focused last", mirroring the browser's
/// last-focused query: the window can be known while no longer focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusedWindow {
    pub id: WindowId,
    pub focused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusNotificationReliability {
    /// Focus-changed notifications arrive dependably; no polling.
    Reliable,
    /// Focus-changed notifications get lost when leaving and re-entering the
    /// browser; the poll fallback re-derives focus.
    Unreliable,
}

impl FocusNotificationReliability {
    pub fn needs_polling(&self) -> bool {
        matches!(self, FocusNotificationReliability::Unreliable)
    }
}

/// OS family string in the browser's vocabulary (`mac`, `win`, `linux`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity(String);

impl PlatformIdentity {
    pub fn new(os: &str) -> Self {
        Self(os.trim().to_ascii_lowercase())
    }

    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "mac",
            "windows" => "win",
            other => other,
        };
        Self::new(os)
    }

    /// Configured identity when present and non-blank, host OS otherwise.
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured.map(str::trim).filter(|value| !value.is_empty()) {
            Some(os) => Self::new(os),
            None => Self::detect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn focus_reliability(&self) -> FocusNotificationReliability {
        if self.0 == "mac" {
            FocusNotificationReliability::Reliable
        } else {
            FocusNotificationReliability::Unreliable
        }
    }
}

/// Queries the reconciler makes against the browser.
pub trait BrowserPlatform {
    fn tab_url(&self, tab_id: TabId) -> Option<String>;

    fn active_tabs(&self, window_id: WindowId) -> Vec<Tab>;

    fn last_focused_window(&self) -> Option<FocusedWindow>;

    /// Feeds a raw notification to platforms that keep their own view of the
    /// browser.
    fn observe(&mut self, _notification: &PlatformNotification) {}
}
