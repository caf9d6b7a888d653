//! Realtime change notifier for match rows.
//!
//! Store writes publish a [`MatchChange`] carrying the full row after
//! the write; nothing else publishes. Delivery is at-least-once with
//! no cross-match ordering: a slow subscriber that lags past the
//! buffer skips ahead to the oldest retained event and keeps going, so
//! consumers reconcile received rows by `updated_at` (last write wins)
//! instead of assuming sequential deltas.

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use coinduel_types::{ChangeOp, Match, MatchChange};

/// Change events buffered per subscriber before lagging kicks in.
pub const CHANGE_BUFFER: usize = 256;

/// Broadcast hub for match-row changes.
pub struct MatchNotifier {
    tx: broadcast::Sender<MatchChange>,
}

impl MatchNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_BUFFER);
        Self { tx }
    }

    /// Publish a change to all current subscribers.
    /// A send with no subscribers is not an error.
    pub fn publish(&self, op: ChangeOp, row: Match) {
        let _ = self.tx.send(MatchChange { op, row });
    }

    /// Subscribe to changes for every match.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to changes for a single match.
    pub fn subscribe_match(&self, id: Uuid) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Some(id),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MatchNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy, infinite sequence of change events. Not restartable: once
/// `recv` returns None the notifier is gone for good.
pub struct Subscription {
    rx: broadcast::Receiver<MatchChange>,
    filter: Option<Uuid>,
}

impl Subscription {
    /// Receive the next change, skipping rows outside the filter.
    /// Returns None once the notifier has been dropped.
    pub async fn recv(&mut self) -> Option<MatchChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.filter.map_or(true, |id| change.row.id == id) {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drop the subscription. Receiving stops immediately.
    pub fn unsubscribe(self) {}
}
