//! Live websocket connections keyed by connection id.

use dashmap::DashMap;
use ride_core::ecs::ConnectionId;
use ride_core::protocol::{Outbound, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<String>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a connection id and returns the receiving half of its frame
    /// queue.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId::from(format!("conn-{}", Uuid::new_v4()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id.clone(), tx);
        debug!(connection = %id, "connection registered");
        (id, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            debug!(connection = %id, "connection unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Serializes and queues one event. Returns false when the recipient is
    /// gone.
    pub fn send(&self, recipient: &ConnectionId, event: &ServerEvent) -> bool {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = event.name(), error = %err, "event not serializable");
                return false;
            }
        };
        let Some(tx) = self.connections.get(recipient) else {
            debug!(connection = %recipient, event = event.name(), "recipient not connected");
            return false;
        };
        tx.send(frame).is_ok()
    }

    /// Delivers a drained outbox. Returns how many frames were queued.
    pub fn deliver(&self, messages: Vec<Outbound>) -> usize {
        messages
            .into_iter()
            .filter(|m| self.send(&m.recipient, &m.event))
            .count()
    }
}
