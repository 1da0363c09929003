use events::EventBus;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Log every run event at debug level until the bus is dropped.
///
/// Resolves to the number of events logged.
pub fn log_events(events: &EventBus) -> JoinHandle<usize> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut seen = 0;
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    seen += 1;
                    debug!(
                        run_id = %envelope.run_id,
                        phase = envelope.event.phase().unwrap_or("-"),
                        event = ?envelope.event,
                        "Run event"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        seen
    })
}
