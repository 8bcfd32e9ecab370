//! Login state. Once a login succeeds the session stays logged in for the
//! life of the process.

use tabtrack_protocol::LoginPayload;
use tracing::{info, warn};

use crate::engine::{Reply, TrackingEngine};

#[derive(Debug, Default)]
pub struct SessionGate {
    logged_in: bool,
}

impl SessionGate {
    /// `restored` is whether the engine came up with a registration from an
    /// earlier run.
    pub fn new(restored: bool) -> Self {
        Self {
            logged_in: restored,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn attempt_login<E: TrackingEngine + ?Sized>(
        &self,
        engine: &mut E,
        login: LoginPayload,
        reply: Reply<bool>,
    ) {
        info!(
            server = %login.server_name,
            username = %login.username,
            device = %login.device_name,
            "Attempting login"
        );
        engine.login(login, reply);
    }

    /// Failures leave the session as it was. No retries.
    pub fn acknowledge_login(&mut self, success: bool) -> bool {
        if success {
            self.logged_in = true;
            info!("Login succeeded");
        } else {
            warn!(logged_in = self.logged_in, "Login failed");
        }
        success
    }
}
