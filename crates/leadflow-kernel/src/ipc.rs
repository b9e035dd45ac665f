//! Kernel event bus.
//!
//! A [`tokio::sync::broadcast`] channel of [`Event`]s.  Three publishers use
//! it:
//!
//! - the dispatcher, for task status changes (the push half of async task
//!   observation);
//! - the registry, for provider registration and health transitions;
//! - the orchestrator, for workflow state transitions.
//!
//! Payloads are shared as `Arc<Event>` across subscribers.  Publishing never
//! blocks and never fails; with nobody listening the event is dropped.
//!
//! ```rust,no_run
//! # use leadflow_kernel::ipc::{IpcBus, Event};
//! # async fn example() {
//! let bus = IpcBus::new(256);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::ProviderDeregistered {
//!     provider_id: "crm-export".into(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatcher::TaskStatus;
use crate::registry::HealthStatus;

const DEFAULT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A dispatched task changed state.
    TaskStatusChanged {
        task_id: Uuid,
        capability: String,
        provider_id: Option<String>,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },

    ProviderHealthChanged {
        provider_id: String,
        from: HealthStatus,
        to: HealthStatus,
        timestamp: DateTime<Utc>,
    },

    /// Registered, or re-registered under the same id.
    ProviderRegistered {
        provider_id: String,
        capabilities: Vec<String>,
    },

    ProviderDeregistered { provider_id: String },

    /// A conversation moved between workflow states during one turn.
    WorkflowTransition {
        conversation_id: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Task this event is about, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskStatusChanged { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Cloneable handle to the kernel's broadcast channel.
#[derive(Clone)]
pub struct IpcBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl IpcBus {
    /// A subscriber lagging more than `capacity` events behind gets
    /// [`broadcast::error::RecvError::Lagged`] on its next receive.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers will see `event`.
    pub fn publish(&self, event: Event) -> usize {
        let delivered = self.sender.send(Arc::new(event)).unwrap_or(0);
        tracing::trace!(receivers = delivered, "event published");
        delivered
    }

    /// Events published before this call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }
}

impl Default for IpcBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(to: &str) -> Event {
        Event::WorkflowTransition {
            conversation_id: "c1".into(),
            from: "greeting".into(),
            to: to.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_share_one_payload() {
        let bus = IpcBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.publish(transition("profile_creation")), 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn publishing_without_subscribers_drops_the_event() {
        let bus = IpcBus::default();
        assert_eq!(bus.publish(transition("profile_creation")), 0);

        // Late subscribers start from the next event.
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_far_behind() {
        let bus = IpcBus::new(2);
        let mut rx = bus.subscribe();
        for to in ["a", "b", "c", "d"] {
            bus.publish(transition(to));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert_eq!(missed, 2),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let task_id = Uuid::now_v7();
        let event = Event::TaskStatusChanged {
            task_id,
            capability: "build_profile".into(),
            provider_id: Some("profile-builder".into()),
            status: TaskStatus::Running,
            timestamp: Utc::now(),
        };
        assert_eq!(event.task_id(), Some(task_id));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_status_changed");
        assert_eq!(json["status"], "running");
        assert_eq!(transition("x").task_id(), None);
    }
}
