//! Kernel event bus.
//!
//! The kernel reports registration changes and every message state
//! transition on a [`tokio::sync::broadcast`] channel.  Events are wrapped in
//! [`Arc`] so fan-out to several observers does not clone the payload.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! simply discarded, and a subscriber that falls more than `capacity` events
//! behind observes [`broadcast::error::RecvError::Lagged`].
//!
//! # Usage
//!
//! ```rust,no_run
//! # use airobot_kernel::events::{EventBus, KernelEvent};
//! # async fn example() {
//! let bus = EventBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(KernelEvent::KernelShutdown);
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::kernel::DropReason;
use crate::message::{AgentId, RequestId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Something observable that happened inside the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelEvent {
    /// An agent received its identity.
    AgentRegistered {
        agent_id: AgentId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent was removed from the registry.  Its id stays retired.
    AgentDeregistered {
        agent_id: AgentId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A message entered the global queue.
    MessagePosted {
        request_id: RequestId,
        sender_id: AgentId,
        target_id: AgentId,
        method: String,
        priority: i32,
    },

    /// A message was moved into its target's inbox.
    MessageDelivered {
        request_id: RequestId,
        target_id: AgentId,
    },

    /// A message left the queue without being delivered.
    MessageDropped {
        request_id: RequestId,
        target_id: AgentId,
        reason: DropReason,
    },

    /// The kernel stopped accepting new work.
    KernelShutdown,
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Publish/subscribe channel for [`KernelEvent`]s.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Debug)]
struct EventBusInner {
    sender: broadcast::Sender<Arc<KernelEvent>>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by at most `capacity` events.
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventBusInner { sender }),
        }
    }

    /// Publish an event to every current subscriber and return how many
    /// will observe it.
    pub fn publish(&self, event: KernelEvent) -> usize {
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "kernel event published");
                n
            }
            // No receivers: discarded.
            Err(_) => 0,
        }
    }

    /// Subscribe to events published from now on.  Earlier events are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KernelEvent>> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(KernelEvent::MessageDelivered {
            request_id: 7,
            target_id: 2,
        });
        assert_eq!(receivers, 1);

        let received = rx.recv().await.expect("should receive event");
        match received.as_ref() {
            KernelEvent::MessageDelivered {
                request_id,
                target_id,
            } => {
                assert_eq!(*request_id, 7);
                assert_eq!(*target_id, 2);
            }
            other => panic!("unexpected event variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribers_share_one_allocation() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(KernelEvent::KernelShutdown);

        let e1 = rx1.recv().await.expect("rx1");
        let e2 = rx2.recv().await.expect("rx2");
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn publish_without_subscribers_is_discarded() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(KernelEvent::KernelShutdown), 0);
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(KernelEvent::KernelShutdown);
        assert!(rx.try_recv().is_ok());
    }
}
