//! Headless broadcast fan-out for connection events.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! receives every event without any single subscriber blocking the others.
//! Publishing never waits: a subscriber that falls more than `capacity`
//! events behind loses the oldest ones and is told how many it missed.
//!
//! Events are delivered in the order they were published. The connection
//! manager publishes from one task per connection, so per-connection order is
//! preserved end to end.

use relay_types::{Event, HubEvent, StatusEvent};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (buffered events before old ones are dropped
/// for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 1024;

/// Shared relay hub. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct RelayHub {
    sender: broadcast::Sender<HubEvent>,
}

impl RelayHub {
    /// Create a hub buffering up to `capacity` events per subscriber.
    /// A zero capacity is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers that were handed the event; `0` when
    /// nobody is listening, which is a normal condition.
    pub fn publish(&self, event: HubEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(connection_id = %event.connection_id(), "hub event with no subscribers");
                0
            }
        }
    }

    pub fn publish_data(&self, event: Event) -> usize {
        self.publish(HubEvent::Data(event))
    }

    pub fn publish_status(&self, status: StatusEvent) -> usize {
        self.publish(HubEvent::Status(status))
    }

    /// Add a subscriber. Dropping the returned handle removes it.
    pub fn subscribe(&self) -> HubSubscriber {
        HubSubscriber {
            filter: None,
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single connection.
    pub fn subscribe_connection(&self, connection_id: impl Into<String>) -> HubSubscriber {
        HubSubscriber {
            filter: Some(connection_id.into()),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A hub subscription, optionally narrowed to one connection id.
pub struct HubSubscriber {
    filter: Option<String>,
    receiver: broadcast::Receiver<HubEvent>,
}

impl HubSubscriber {
    /// Wait for the next matching event.
    ///
    /// Lag is logged and skipped over. Returns `None` once every [`RelayHub`]
    /// clone has been dropped.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(filter = ?self.filter, lagged_by = n, "hub subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is
    /// buffered.
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(filter = ?self.filter, lagged_by = n, "hub subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &HubEvent) -> bool {
        self.filter
            .as_deref()
            .is_none_or(|id| event.connection_id() == id)
    }
}
