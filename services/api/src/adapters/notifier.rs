//! services/api/src/adapters/notifier.rs
//!
//! `ScanNotifier` backed by a `tokio::sync::broadcast` channel. Every
//! subscriber sees every event and keeps only those for its session.

use attendance_core::domain::ScanEvent;
use attendance_core::ports::{ScanEventStream, ScanNotifier};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct BroadcastNotifier {
    sender: broadcast::Sender<ScanEvent>,
}

impl BroadcastNotifier {
    /// `capacity` is how many events a slow subscriber may fall behind before
    /// it starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ScanNotifier for BroadcastNotifier {
    fn publish(&self, event: ScanEvent) {
        if self.sender.send(event).is_err() {
            debug!("No live subscribers for scan event");
        }
    }

    fn subscribe(&self, session_id: Uuid) -> ScanEventStream {
        let mut receiver = self.sender.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.session_id == session_id => yield event,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber for session {} skipped {} scan events", session_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
