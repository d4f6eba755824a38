//! Progress reporting
//!
//! Passes emit `Init`, one `File` per finished artifact, then `Done`.
//! Observers are called from worker context and must not block.

use crate::types::{AttemptLabel, BuildRecord};
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress event for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Pass is starting
    Init { attempt: AttemptLabel, total: usize },
    /// One artifact finished
    File {
        record: BuildRecord,
        completed: usize,
        total: usize,
    },
    /// Pass finished
    Done {
        attempt: AttemptLabel,
        total: usize,
        succeeded: usize,
    },
}

/// Receives progress events
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Discards all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel
///
/// A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    /// Create observer and its receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Init { attempt, total } => {
                tracing::info!(%attempt, total, "pass started");
            }
            ProgressEvent::File {
                record,
                completed,
                total,
            } => {
                tracing::info!(
                    artifact = %record.artifact_id,
                    attempt = %record.attempt,
                    outcome = record.outcome.tag(),
                    "[{completed}/{total}]"
                );
            }
            ProgressEvent::Done {
                attempt,
                total,
                succeeded,
            } => {
                tracing::info!(%attempt, total, succeeded, "pass finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_survives_dropped_receiver() {
        let (observer, receiver) = ChannelObserver::new();
        drop(receiver);
        observer.on_event(ProgressEvent::Init {
            attempt: AttemptLabel::Initial,
            total: 3,
        });
    }

    #[tokio::test]
    async fn channel_observer_delivers_in_order() {
        let (observer, mut receiver) = ChannelObserver::new();
        observer.on_event(ProgressEvent::Init {
            attempt: AttemptLabel::Retry,
            total: 1,
        });
        observer.on_event(ProgressEvent::Done {
            attempt: AttemptLabel::Retry,
            total: 1,
            succeeded: 1,
        });

        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::Init { total: 1, .. })
        ));
        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::Done { succeeded: 1, .. })
        ));
    }

    #[test]
    fn events_serialize_tagged() {
        let value = serde_json::to_value(ProgressEvent::Init {
            attempt: AttemptLabel::Initial,
            total: 5,
        })
        .unwrap();
        assert_eq!(value["event"], "init");
        assert_eq!(value["attempt"], "initial");
    }
}
