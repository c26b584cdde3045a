//! Observable node lifecycle events.
//!
//! Subscribers receive every [`NodeEvent`] published after they subscribed.
//! Membership payloads (`Insert`/`Remove`) are passed through from the
//! transport without interpretation.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::address::Address;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Lifecycle event published by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The node gained an address.
    Connect(Address),
    /// The node lost its address.
    Disconnect,
    /// Transport membership insert, verbatim.
    Insert(Vec<Value>),
    /// Transport membership removal, verbatim.
    Remove(Vec<Value>),
}

/// Publisher side of the node events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Events with no subscribers are discarded.
    pub fn publish(&self, event: NodeEvent) {
        let _ = self.tx.send(event);
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A live subscription to node events.
///
/// Dropping the subscription also unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<NodeEvent>,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the node is gone. A subscriber that fell behind
    /// skips the events it missed.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}
