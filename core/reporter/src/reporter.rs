//! The event actor.
//!
//! One thread owns every piece of reporter state. Socket connections, the
//! poll timer and engine replies only post [`Input`]s into its inbox, and
//! each input is handled to completion before the next one is taken.

use serde_json::json;
use std::sync::mpsc::{self, Receiver, Sender};
use tabtrack_protocol::{Control, PlatformNotification, Response};
use tracing::{debug, error, info, warn};

use crate::control::{self, ControlContext};
use crate::engine::{Reply, TrackingEngine};
use crate::platform::{BrowserPlatform, PlatformIdentity, WindowId};
use crate::reconciler::{Directive, FocusEvent, FocusReconciler, FocusState, Settlement};
use crate::session::SessionGate;
use crate::tracking::TrackingState;

/// Where a connection waits for its answer.
pub type Responder = Sender<Response>;

/// Which path asked the engine to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOrigin {
    User,
    Window { window_id: WindowId, generation: u64 },
}

#[derive(Debug)]
pub enum Input {
    Platform(PlatformNotification),
    Focus(FocusEvent),
    Control {
        control: Control,
        id: Option<String>,
        responder: Responder,
    },
    StartAcked {
        success: bool,
        origin: StartOrigin,
    },
    LoginAcked {
        success: bool,
        id: Option<String>,
        responder: Responder,
    },
}

/// Cloneable posting end of the actor's inbox.
#[derive(Debug, Clone)]
pub struct ReporterHandle {
    pub(crate) outbox: Sender<Input>,
}

impl ReporterHandle {
    /// Returns `false` once the actor is gone.
    pub fn submit(&self, input: Input) -> bool {
        self.outbox.send(input).is_ok()
    }
}

/// Builds engine replies that come back through the inbox.
pub struct Replies {
    outbox: Sender<Input>,
}

impl Replies {
    pub fn start(&self, origin: StartOrigin) -> Reply<bool> {
        let outbox = self.outbox.clone();
        Reply::new(move |success| {
            let _ = outbox.send(Input::StartAcked { success, origin });
        })
    }

    pub fn login(&self, id: Option<String>, responder: Responder) -> Reply<bool> {
        let outbox = self.outbox.clone();
        Reply::new(move |success| {
            let _ = outbox.send(Input::LoginAcked {
                success,
                id,
                responder,
            });
        })
    }
}

pub struct Reporter<E, P> {
    engine: E,
    platform: P,
    tracking: TrackingState,
    session: SessionGate,
    reconciler: FocusReconciler,
    replies: Replies,
    inbox: Receiver<Input>,
}

impl<E: TrackingEngine, P: BrowserPlatform> Reporter<E, P> {
    pub fn new(engine: E, platform: P, identity: PlatformIdentity) -> Self {
        let (outbox, inbox) = mpsc::channel();
        let session = SessionGate::new(engine.is_registered());
        let tracking = TrackingState::new(identity);

        info!(
            platform = tracking.platform().as_str(),
            reliability = ?tracking.reliability(),
            logged_in = session.is_logged_in(),
            engine_tracking = engine.is_tracking(),
            "Reporter state initialized"
        );

        Self {
            engine,
            platform,
            tracking,
            session,
            reconciler: FocusReconciler::default(),
            replies: Replies { outbox },
            inbox,
        }
    }

    pub fn handle(&self) -> ReporterHandle {
        ReporterHandle {
            outbox: self.replies.outbox.clone(),
        }
    }

    /// Handles inputs until every sender, including the actor's own, is gone.
    pub fn run(mut self) {
        while let Ok(input) = self.inbox.recv() {
            self.process(input);
        }
        debug!("Reporter inbox closed");
    }

    pub fn process(&mut self, input: Input) {
        match input {
            Input::Platform(notification) => {
                debug!(event = notification.kind(), "Platform notification");
                self.platform.observe(&notification);
                if let Some(event) = FocusEvent::from_notification(&notification) {
                    self.on_focus(event);
                }
            }
            Input::Focus(event) => self.on_focus(event),
            Input::Control {
                control,
                id,
                responder,
            } => {
                debug!(action = %control.action(), id = ?id, "Control request");
                let response = control::dispatch(
                    control,
                    id,
                    &responder,
                    ControlContext {
                        tracking: &mut self.tracking,
                        session: &self.session,
                        reconciler: &mut self.reconciler,
                        engine: &mut self.engine,
                        replies: &self.replies,
                    },
                );
                let _ = responder.send(response);
            }
            Input::StartAcked { success, origin } => self.on_start_acked(success, origin),
            Input::LoginAcked {
                success,
                id,
                responder,
            } => {
                let success = self.session.acknowledge_login(success);
                if responder.send(Response::ok(id, json!(success))).is_err() {
                    debug!("Login caller went away before the answer");
                }
            }
        }
    }

    fn on_focus(&mut self, event: FocusEvent) {
        match self
            .reconciler
            .decide(&event, &self.tracking, &self.platform)
        {
            Directive::Ignore => {}
            Directive::SwitchUrl(url) => {
                info!(url = %url, "Switching URL");
                self.engine.switch_url(&url);
            }
            Directive::SwitchToWindow(window_id) => {
                let generation = self.reconciler.begin_switch();
                debug!(window_id, generation, "Switching to window");
                let reply = self.replies.start(StartOrigin::Window {
                    window_id,
                    generation,
                });
                self.tracking.request_start(&mut self.engine, reply);
            }
            Directive::Pause => {
                if self.reconciler.state() != FocusState::Paused || self.tracking.is_enabled() {
                    info!("Browser lost focus; pausing tracking");
                } else {
                    debug!("No browser window focused");
                }
                self.reconciler.pause();
                self.tracking.request_stop(&mut self.engine);
            }
        }
    }

    fn on_start_acked(&mut self, success: bool, origin: StartOrigin) {
        let started = self.tracking.acknowledge_start(success);

        let (window_id, generation) = match origin {
            StartOrigin::User => {
                if !started {
                    warn!("Engine refused to start tracking");
                    self.tracking.disarm();
                }
                return;
            }
            StartOrigin::Window {
                window_id,
                generation,
            } => (window_id, generation),
        };

        if !started {
            error!(window_id, "Failed to start tracking");
            return;
        }
        if !self.tracking.is_armed() {
            debug!(window_id, "Tracking was stopped while the start was in flight");
            return;
        }
        if !self.reconciler.is_current(generation) {
            debug!(window_id, generation, "Focus moved on while the start was in flight");
            return;
        }

        let tabs = self.platform.active_tabs(window_id);
        match self.reconciler.settle(window_id, &tabs) {
            Settlement::Tracking { window_id, url } => {
                info!(window_id, url = %url, "Tracking window");
                self.engine.switch_url(&url);
            }
            Settlement::Anomaly {
                window_id,
                active_tabs,
            } => {
                error!(
                    window_id,
                    active_tabs, "Expected exactly one active tab; pausing"
                );
                self.tracking.request_stop(&mut self.engine);
            }
        }
    }
}

#[cfg(test)]
impl<E: TrackingEngine, P: BrowserPlatform> Reporter<E, P> {
    /// Drains the inbox, returning how many inputs were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.inbox.try_recv() {
            self.process(input);
            handled += 1;
        }
        handled
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn tracking(&self) -> &TrackingState {
        &self.tracking
    }

    pub fn focus_state(&self) -> FocusState {
        self.reconciler.state()
    }
}
