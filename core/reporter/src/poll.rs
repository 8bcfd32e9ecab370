//! Poll fallback for platforms whose focus notifications get lost.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::platform::FocusNotificationReliability;
use crate::reconciler::FocusEvent;
use crate::reporter::{Input, ReporterHandle};

/// Poll interval for the platform, or `None` when it is never polled.
pub fn schedule(reliability: FocusNotificationReliability, interval: Duration) -> Option<Duration> {
    reliability.needs_polling().then_some(interval)
}

/// Starts the timer thread. Ticks stop once the actor is gone.
pub fn spawn(
    reliability: FocusNotificationReliability,
    interval: Duration,
    reporter: ReporterHandle,
) -> io::Result<Option<JoinHandle<()>>> {
    let Some(interval) = schedule(reliability, interval) else {
        info!("Focus notifications are reliable; window polling disabled");
        return Ok(None);
    };

    info!(interval_ms = interval.as_millis() as u64, "Window polling enabled");
    let handle = thread::Builder::new()
        .name("focus-poll".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            if !reporter.submit(Input::Focus(FocusEvent::PollTick)) {
                debug!("Reporter gone; focus polling stopped");
                break;
            }
        })?;
    Ok(Some(handle))
}
