//! Focus reconciliation.
//!
//! The reconciler turns focus events into [`Directive`]s for the actor and
//! tracks which window, if any, it believes is being tracked. Starting the
//! engine is asynchronous, so `SwitchToWindow` is completed in two halves: the
//! actor requests a start, and once the engine acknowledges it the active
//! tabs of the window are [`settle`](FocusReconciler::settle)d. Every switch
//! or pause moves the focus generation on, so an acknowledgment for a window
//! the user has since left is recognised as superseded.
//!
//! ```text
//!            WindowFocusChanged{w >= 0}, one active tab
//!   Paused ───────────────────────────────────────────▶ Tracking(w)
//!     ▲                                                    │
//!     └──── WindowFocusChanged{w < 0} / 0 or 2+ tabs ──────┘
//! ```

use tabtrack_protocol::PlatformNotification;
use tracing::debug;

use crate::platform::{BrowserPlatform, FocusedWindow, Tab, TabId, WindowId, NO_WINDOW};
use crate::tracking::TrackingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Paused,
    Tracking(WindowId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEvent {
    TabUpdated { tab_id: TabId, url: String },
    TabActivated { tab_id: TabId, window_id: WindowId },
    WindowFocusChanged { window_id: WindowId },
    PollTick,
}

impl FocusEvent {
    /// Snapshots only refresh the platform view; they carry no focus event.
    pub fn from_notification(notification: &PlatformNotification) -> Option<Self> {
        match notification {
            PlatformNotification::TabUpdated { tab_id, url, .. } => Some(FocusEvent::TabUpdated {
                tab_id: *tab_id,
                url: url.clone(),
            }),
            PlatformNotification::TabActivated { tab_id, window_id } => {
                Some(FocusEvent::TabActivated {
                    tab_id: *tab_id,
                    window_id: *window_id,
                })
            }
            PlatformNotification::WindowFocusChanged { window_id } => {
                Some(FocusEvent::WindowFocusChanged {
                    window_id: *window_id,
                })
            }
            PlatformNotification::Snapshot { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Ignore,
    SwitchUrl(String),
    /// Start the engine, then settle on the window's active tab.
    SwitchToWindow(WindowId),
    Pause,
}

/// Outcome of inspecting a window's active tabs after a start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Tracking { window_id: WindowId, url: String },
    Anomaly { window_id: WindowId, active_tabs: usize },
}

#[derive(Debug)]
pub struct FocusReconciler {
    state: FocusState,
    generation: u64,
}

impl Default for FocusReconciler {
    fn default() -> Self {
        Self {
            state: FocusState::Paused,
            generation: 0,
        }
    }
}

impl FocusReconciler {
    pub fn state(&self) -> FocusState {
        self.state
    }

    /// Marks the start of a window switch; the returned generation travels
    /// with the engine start and is checked before settling.
    pub fn begin_switch(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn decide<P: BrowserPlatform + ?Sized>(
        &self,
        event: &FocusEvent,
        tracking: &TrackingState,
        platform: &P,
    ) -> Directive {
        if !tracking.is_armed() {
            return Directive::Ignore;
        }

        match event {
            FocusEvent::TabUpdated { tab_id, url } => {
                debug!(tab_id, "Tab updated");
                Directive::SwitchUrl(url.clone())
            }
            FocusEvent::TabActivated { tab_id, window_id } => match platform.tab_url(*tab_id) {
                Some(url) => Directive::SwitchUrl(url),
                None => {
                    debug!(tab_id, window_id, "Activated tab has no known URL");
                    Directive::Ignore
                }
            },
            FocusEvent::WindowFocusChanged { window_id } => focus_directive(*window_id),
            FocusEvent::PollTick => {
                if !tracking.reliability().needs_polling() {
                    return Directive::Ignore;
                }
                let window_id = match platform.last_focused_window() {
                    Some(FocusedWindow { id, focused: true }) => id,
                    _ => NO_WINDOW,
                };
                focus_directive(window_id)
            }
        }
    }

    /// Completes a window switch once the engine has started.
    pub fn settle(&mut self, window_id: WindowId, active_tabs: &[Tab]) -> Settlement {
        match active_tabs {
            [tab] => {
                self.state = FocusState::Tracking(window_id);
                Settlement::Tracking {
                    window_id,
                    url: tab.url.clone(),
                }
            }
            tabs => {
                self.state = FocusState::Paused;
                Settlement::Anomaly {
                    window_id,
                    active_tabs: tabs.len(),
                }
            }
        }
    }

    pub fn pause(&mut self) {
        self.state = FocusState::Paused;
        self.generation += 1;
    }
}

fn focus_directive(window_id: WindowId) -> Directive {
    if window_id >= 0 {
        Directive::SwitchToWindow(window_id)
    } else {
        Directive::Pause
    }
}
