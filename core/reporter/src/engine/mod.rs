//! The tracking engine seam.
//!
//! Engine calls never block the caller. Calls that produce an answer take a
//! [`Reply`]; the engine invokes it whenever the answer is ready, possibly from
//! another thread. The reporter's replies only post back into its inbox, so
//! continuations always run on the event actor.

mod journal;
mod store;

pub use journal::JournalEngine;

use std::fmt;
use tabtrack_protocol::LoginPayload;

pub struct Reply<T> {
    deliver: Box<dyn FnOnce(T) + Send>,
}

impl<T> Reply<T> {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            deliver: Box::new(deliver),
        }
    }

    pub fn send(self, value: T) {
        (self.deliver)(value)
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply")
    }
}

pub trait TrackingEngine {
    /// Idempotent: starting while already tracking acknowledges success.
    fn start_tracking(&mut self, reply: Reply<bool>);

    /// Fire-and-forget.
    fn stop_tracking(&mut self);

    /// Fire-and-forget.
    fn switch_url(&mut self, url: &str);

    fn login(&mut self, login: LoginPayload, reply: Reply<bool>);

    fn is_tracking(&self) -> bool;

    /// Whether a device registration survived from an earlier run.
    fn is_registered(&self) -> bool;
}
