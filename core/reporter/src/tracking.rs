//! Tracking flags owned by the event actor.
//!
//! `enabled` mirrors what the engine last acknowledged and drops to `false`
//! the moment a stop is requested. `armed` is the user's standing request to
//! be tracked; focus handling only runs while it is set, so a pause caused by
//! focus loss resumes on the next focus event.

use tracing::{debug, info};

use crate::engine::{Reply, TrackingEngine};
use crate::platform::{FocusNotificationReliability, PlatformIdentity};

#[derive(Debug)]
pub struct TrackingState {
    enabled: bool,
    armed: bool,
    platform: PlatformIdentity,
    reliability: FocusNotificationReliability,
}

impl TrackingState {
    pub fn new(platform: PlatformIdentity) -> Self {
        let reliability = platform.focus_reliability();
        Self {
            enabled: false,
            armed: false,
            platform,
            reliability,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn platform(&self) -> &PlatformIdentity {
        &self.platform
    }

    pub fn reliability(&self) -> FocusNotificationReliability {
        self.reliability
    }

    /// Asks the engine to start. The answer comes back through `reply` and
    /// must be fed to [`TrackingState::acknowledge_start`].
    pub fn request_start<E: TrackingEngine + ?Sized>(&self, engine: &mut E, reply: Reply<bool>) {
        debug!(enabled = self.enabled, "Requesting engine start");
        engine.start_tracking(reply);
    }

    /// Applies a start acknowledgment. Stale acknowledgments are applied too.
    pub fn acknowledge_start(&mut self, success: bool) -> bool {
        if self.enabled != success {
            info!(enabled = success, "Tracking flag changed");
        }
        self.enabled = success;
        success
    }

    pub fn request_stop<E: TrackingEngine + ?Sized>(&mut self, engine: &mut E) {
        engine.stop_tracking();
        if self.enabled {
            info!(enabled = false, "Tracking flag changed");
        }
        self.enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{reply_channel, EngineCall, ScriptedEngine};

    fn state() -> TrackingState {
        TrackingState::new(PlatformIdentity::new("linux"))
    }

    #[test]
    fn starts_disabled_and_disarmed() {
        let state = state();
        assert!(!state.is_enabled());
        assert!(!state.is_armed());
        assert_eq!(
            state.reliability(),
            FocusNotificationReliability::Unreliable
        );
    }

    #[test]
    fn enabled_follows_the_acknowledgment() {
        let mut engine = ScriptedEngine::default();
        let mut state = state();

        state.request_start(&mut engine, Reply::new(|_| {}));
        assert!(!state.is_enabled(), "flag waits for the engine");
        assert!(state.acknowledge_start(true));
        assert!(state.is_enabled());

        assert!(!state.acknowledge_start(false));
        assert!(!state.is_enabled());
    }

    #[test]
    fn repeated_starts_keep_tracking_enabled() {
        let mut engine = ScriptedEngine::default();
        let mut state = state();

        for _ in 0..2 {
            let (reply, rx) = reply_channel();
            state.request_start(&mut engine, reply);
            state.acknowledge_start(rx.recv().expect("ack"));
        }

        assert!(state.is_enabled());
        assert_eq!(engine.count(&EngineCall::Start), 2);
    }

    #[test]
    fn stop_clears_the_flag_before_returning() {
        let mut engine = ScriptedEngine::default();
        let mut state = state();
        state.acknowledge_start(true);

        state.request_stop(&mut engine);

        assert!(!state.is_enabled());
        assert_eq!(engine.calls(), &[EngineCall::Stop]);
    }
}
