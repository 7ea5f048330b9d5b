//! Port for structured turn-event logging.
//!
//! Separate from `tracing`: tracing carries human-readable diagnostics, while
//! this port records the turn's state transitions in a machine-readable form
//! (one JSON object per line in the infrastructure adapter).

use crate::ports::turn_events::TurnEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Records turn events.
///
/// `log` is synchronous and infallible so a logging problem never disturbs
/// a turn; implementations swallow their own I/O errors.
pub trait TurnLogger: Send + Sync {
    fn log(&self, event: &TurnEvent);
}

/// No-op implementation for tests and when logging is disabled.
pub struct NoTurnLogger;

impl TurnLogger for NoTurnLogger {
    fn log(&self, _event: &TurnEvent) {}
}

/// Drain `events` into `logger` until the channel closes.
///
/// Deltas are skipped unless `include_deltas` is set.
pub fn spawn_turn_logger(
    mut events: broadcast::Receiver<TurnEvent>,
    logger: Arc<dyn TurnLogger>,
    include_deltas: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if include_deltas || !event.is_delta() {
                        logger.log(&event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Turn logger lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
