//! Browser state rebuilt from bridge notifications.
//!
//! The reporter cannot query the browser directly, so it keeps a mirror:
//! every notification is applied before the reconciler sees it, and
//! `snapshot` replaces the whole view.

use std::collections::HashMap;
use tabtrack_protocol::{PlatformNotification, WindowView};
use tracing::debug;

use crate::platform::{BrowserPlatform, FocusedWindow, Tab, TabId, WindowId};

#[derive(Debug, Clone, Default)]
struct TabRecord {
    url: Option<String>,
    window_id: Option<WindowId>,
}

#[derive(Debug, Default)]
pub struct BrowserMirror {
    tabs: HashMap<TabId, TabRecord>,
    /// Active tab ids per window, in the order they became active.
    active: HashMap<WindowId, Vec<TabId>>,
    last_focused: Option<WindowId>,
    has_focus: bool,
}

impl BrowserMirror {
    fn activate(&mut self, tab_id: TabId, window_id: WindowId) {
        let record = self.tabs.entry(tab_id).or_default();
        if let Some(previous) = record.window_id.replace(window_id) {
            if previous != window_id {
                if let Some(active) = self.active.get_mut(&previous) {
                    active.retain(|id| *id != tab_id);
                }
            }
        }
        self.active.insert(window_id, vec![tab_id]);
    }

    fn replace(&mut self, windows: &[WindowView]) {
        self.tabs.clear();
        self.active.clear();
        self.last_focused = None;
        self.has_focus = false;

        for window in windows {
            let active = self.active.entry(window.id).or_default();
            for tab in &window.tabs {
                self.tabs.insert(
                    tab.id,
                    TabRecord {
                        url: Some(tab.url.clone()),
                        window_id: Some(window.id),
                    },
                );
                if tab.active {
                    active.push(tab.id);
                }
            }
            if window.focused {
                self.last_focused = Some(window.id);
                self.has_focus = true;
            }
        }

        debug!(
            windows = windows.len(),
            tabs = self.tabs.len(),
            focused = ?self.last_focused,
            "Browser mirror replaced from snapshot"
        );
    }
}

impl BrowserPlatform for BrowserMirror {
    fn tab_url(&self, tab_id: TabId) -> Option<String> {
        self.tabs.get(&tab_id).and_then(|record| record.url.clone())
    }

    fn active_tabs(&self, window_id: WindowId) -> Vec<Tab> {
        let Some(active) = self.active.get(&window_id) else {
            return Vec::new();
        };

        active
            .iter()
            .filter_map(|tab_id| {
                let url = self.tabs.get(tab_id)?.url.clone()?;
                Some(Tab {
                    id: *tab_id,
                    window_id,
                    url,
                })
            })
            .collect()
    }

    fn last_focused_window(&self) -> Option<FocusedWindow> {
        self.last_focused.map(|id| FocusedWindow {
            id,
            focused: self.has_focus,
        })
    }

    fn observe(&mut self, notification: &PlatformNotification) {
        match notification {
            PlatformNotification::TabUpdated {
                tab_id,
                window_id,
                url,
            } => {
                let record = self.tabs.entry(*tab_id).or_default();
                record.url = Some(url.clone());
                if window_id.is_some() {
                    record.window_id = *window_id;
                }
            }
            PlatformNotification::TabActivated { tab_id, window_id } => {
                self.activate(*tab_id, *window_id);
            }
            PlatformNotification::WindowFocusChanged { window_id } => {
                if *window_id >= 0 {
                    self.last_focused = Some(*window_id);
                    self.has_focus = true;
                } else {
                    self.has_focus = false;
                }
            }
            PlatformNotification::Snapshot { windows } => self.replace(windows),
        }
    }
}
