//! Control requests from the UI.
//!
//! Every action answers on the spot except `LOGIN`, which answers `pending`
//! here and sends its result once the engine replies.

use serde_json::json;
use tabtrack_protocol::{Control, Response};
use tracing::info;

use crate::engine::TrackingEngine;
use crate::reconciler::FocusReconciler;
use crate::reporter::{Replies, Responder, StartOrigin};
use crate::session::SessionGate;
use crate::tracking::TrackingState;

/// The actor state a control request may touch.
pub struct ControlContext<'a, E: ?Sized> {
    pub tracking: &'a mut TrackingState,
    pub session: &'a SessionGate,
    pub reconciler: &'a mut FocusReconciler,
    pub engine: &'a mut E,
    pub replies: &'a Replies,
}

/// Handles one control request and returns the response to write now.
pub fn dispatch<E: TrackingEngine + ?Sized>(
    control: Control,
    id: Option<String>,
    responder: &Responder,
    ctx: ControlContext<'_, E>,
) -> Response {
    match control {
        Control::StartTracking => {
            info!("User started tracking");
            ctx.tracking.arm();
            ctx.tracking
                .request_start(ctx.engine, ctx.replies.start(StartOrigin::User));
            Response::ack(id)
        }
        Control::StopTracking => {
            info!("User stopped tracking");
            ctx.tracking.disarm();
            ctx.reconciler.pause();
            ctx.tracking.request_stop(ctx.engine);
            Response::ack(id)
        }
        Control::GetTracking => Response::ok(id, json!(ctx.tracking.is_enabled())),
        Control::CheckLogin => Response::ok(id, json!(ctx.session.is_logged_in())),
        Control::IsTracking => Response::ok(id, json!(ctx.engine.is_tracking())),
        Control::Login(login) => {
            let reply = ctx.replies.login(id.clone(), responder.clone());
            ctx.session.attempt_login(ctx.engine, login, reply);
            Response::pending(id)
        }
    }
}
