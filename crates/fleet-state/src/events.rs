//! Event bus for group mutations and service state transitions.
//!
//! Backed by a `tokio::sync::broadcast` channel: publishing never blocks,
//! and a subscriber that falls behind sees `RecvError::Lagged` instead of
//! stalling the registries.

use fleet_core::{Group, GroupName, Service, ServiceName, ServiceState};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// A change observable by external consumers (dashboards, bots, logs).
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    GroupCreated(Group),
    GroupUpdated(Group),
    GroupDestroyed(GroupName),
    ServiceDeployed(Service),
    ServiceStateChanged {
        service: ServiceName,
        group: GroupName,
        from: ServiceState,
        to: ServiceState,
    },
    ServiceRemoved {
        service: ServiceName,
        group: GroupName,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
