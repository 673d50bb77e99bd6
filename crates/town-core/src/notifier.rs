//! Change notification after committed writes.
//!
//! The store calls every registered [`ChangeNotifier`] synchronously after a
//! write commits, at most once per commit, with the newly derived state.
//! How subscribers consume it is their business; [`BroadcastNotifier`] fans
//! the state out over a tokio broadcast channel for websocket handlers and
//! other in-process listeners.

use std::sync::Arc;

use tokio::sync::broadcast;
use town_types::WorldState;
use tracing::debug;

/// Callback invoked after each committed write.
pub trait ChangeNotifier: Send + Sync {
    /// Called with the state that was just persisted.
    fn notify(&self, state: &Arc<WorldState>);
}

/// A notifier that does nothing.
pub struct NoOpNotifier;

impl ChangeNotifier for NoOpNotifier {
    fn notify(&self, _state: &Arc<WorldState>) {}
}

/// Fans committed states out to any number of subscribers.
///
/// Slow subscribers lag rather than block the writer; a lagging receiver
/// skips to the newest states.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Arc<WorldState>>,
}

impl BroadcastNotifier {
    /// Create a notifier whose channel buffers `capacity` states.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A new receiver of committed states.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<WorldState>> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send a state to all subscribers. Returns how many received it.
    pub fn broadcast(&self, state: Arc<WorldState>) -> usize {
        // A send error only means there are no receivers right now.
        self.tx.send(state).unwrap_or(0)
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, state: &Arc<WorldState>) {
        let receivers = self.broadcast(Arc::clone(state));
        debug!(receivers, "state change broadcast sent");
    }
}
