//! Service registry — the single source of truth for live services.
//!
//! Keyed by display name (`<group>-<index>`). All state changes go through
//! [`ServiceRegistry::set_state`], [`ServiceRegistry::set_state_of`] or
//! [`ServiceRegistry::mark_starting`], which enforce the lifecycle state
//! machine under the write lock so a scheduler tick and a health tick can
//! never interleave a transition. Names are reused once a service is
//! dropped, so callers acting on an earlier snapshot pass the snapshot and
//! the transition is refused if the name now belongs to someone else.

use std::collections::{BTreeMap, BTreeSet};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::{BackendHandle, Group, Service, ServiceId, ServiceState};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{RegistryError, RegistryResult};
use crate::events::{EventBus, FleetEvent};

/// Cheaply cloneable handle to the service registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    services: Arc<RwLock<BTreeMap<String, Service>>>,
    events: EventBus,
    work_root: PathBuf,
    port_start: u16,
}

impl ServiceRegistry {
    pub fn new(events: EventBus, work_root: impl Into<PathBuf>, port_start: u16) -> Self {
        Self {
            services: Arc::new(RwLock::new(BTreeMap::new())),
            events,
            work_root: work_root.into(),
            port_start,
        }
    }

    /// Root under which service working directories are created.
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Snapshot of every registered service.
    pub async fn items(&self) -> Vec<Service> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn find(&self, name: &str) -> Option<Service> {
        self.services.read().await.get(name).cloned()
    }

    pub async fn find_by_group(&self, group: &str) -> Vec<Service> {
        self.services
            .read()
            .await
            .values()
            .filter(|s| s.group == group)
            .cloned()
            .collect()
    }

    pub async fn count_by_group(&self, group: &str) -> u32 {
        self.services
            .read()
            .await
            .values()
            .filter(|s| s.group == group)
            .count() as u32
    }

    /// Services currently in `state`.
    pub async fn in_state(&self, state: ServiceState) -> Vec<Service> {
        self.services
            .read()
            .await
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect()
    }

    /// Register a service built by the caller. It must be PREPARING and
    /// its name must not be taken.
    pub async fn deploy(&self, service: Service) -> RegistryResult<Service> {
        let name = service.name();
        if service.state != ServiceState::Preparing {
            return Err(RegistryError::IllegalStateTransition {
                service: name,
                from: service.state,
                to: ServiceState::Preparing,
            });
        }
        {
            let mut services = self.services.write().await;
            if services.contains_key(&name) {
                return Err(RegistryError::DuplicateService(name));
            }
            services.insert(name.clone(), service.clone());
        }
        debug!(service = %name, port = service.port, "service deployed");
        self.events.publish(FleetEvent::ServiceDeployed(service.clone()));
        Ok(service)
    }

    /// Allocate an index and port for a new service of `group` and
    /// register it as PREPARING, atomically.
    pub async fn reserve(&self, group: &Group) -> RegistryResult<Service> {
        let service = {
            let mut services = self.services.write().await;

            let used_indices: BTreeSet<u32> = services
                .values()
                .filter(|s| s.group == group.name)
                .map(|s| s.index)
                .collect();
            let index = (1..).find(|i| !used_indices.contains(i)).unwrap_or(1);

            let used_ports: BTreeSet<u16> = services.values().map(|s| s.port).collect();
            let port = next_free_port(self.port_start, &used_ports)
                .ok_or(RegistryError::NoFreePort(self.port_start))?;

            let service = Service::new(&group.name, index, port, &self.work_root);
            services.insert(service.name(), service.clone());
            service
        };

        debug!(service = %service.name(), port = service.port, "service reserved");
        self.events.publish(FleetEvent::ServiceDeployed(service.clone()));
        Ok(service)
    }

    /// Move a PREPARING service to STARTING, attaching its backend handle.
    /// Fails with [`RegistryError::ServiceReplaced`] if the name now belongs
    /// to a different service than `service`.
    pub async fn mark_starting(
        &self,
        service: &Service,
        handle: BackendHandle,
    ) -> RegistryResult<Service> {
        self.transition(&service.name(), Some(service.id), ServiceState::Starting, Some(handle))
            .await
    }

    /// Apply a state transition. Entering STARTING requires a backend
    /// handle and therefore goes through [`Self::mark_starting`].
    pub async fn set_state(&self, name: &str, to: ServiceState) -> RegistryResult<Service> {
        self.transition(name, None, to, None).await
    }

    /// Like [`Self::set_state`], but only if `service` is still the one
    /// registered under its name.
    pub async fn set_state_of(&self, service: &Service, to: ServiceState) -> RegistryResult<Service> {
        self.transition(&service.name(), Some(service.id), to, None)
            .await
    }

    async fn transition(
        &self,
        name: &str,
        expected: Option<ServiceId>,
        to: ServiceState,
        handle: Option<BackendHandle>,
    ) -> RegistryResult<Service> {
        let (from, updated) = {
            let mut services = self.services.write().await;
            let service = services
                .get_mut(name)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
            if let Some(expected) = expected.filter(|id| *id != service.id) {
                debug!(service = %name, %expected, actual = %service.id, "transition for a replaced service ignored");
                return Err(RegistryError::ServiceReplaced {
                    service: name.to_string(),
                    expected,
                });
            }

            let from = service.state;
            let handle_ok = (to == ServiceState::Starting) == handle.is_some();
            if !from.can_transition_to(to) || !handle_ok {
                error!(service = %name, %from, %to, "illegal state transition rejected");
                return Err(RegistryError::IllegalStateTransition {
                    service: name.to_string(),
                    from,
                    to,
                });
            }

            service.state = to;
            if let Some(handle) = handle {
                service.handle = Some(handle);
            }
            (from, service.clone())
        };

        info!(service = %name, %from, %to, "service state changed");
        self.events.publish(FleetEvent::ServiceStateChanged {
            service: name.to_string(),
            group: updated.group.clone(),
            from,
            to,
        });
        Ok(updated)
    }

    /// Remove a STOPPING service. Its backend handle goes with it.
    pub async fn drop_service(&self, name: &str) -> RegistryResult<Service> {
        let removed = {
            let mut services = self.services.write().await;
            let state = services
                .get(name)
                .map(|s| s.state)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
            if state != ServiceState::Stopping {
                return Err(RegistryError::NotStopping {
                    service: name.to_string(),
                    state,
                });
            }
            services
                .remove(name)
                .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?
        };

        debug!(service = %name, "service removed");
        self.events.publish(FleetEvent::ServiceRemoved {
            service: name.to_string(),
            group: removed.group.clone(),
        });
        Ok(removed)
    }
}

/// Lowest port at or above `start` that no live service holds and the host
/// will still let us bind.
fn next_free_port(start: u16, used: &BTreeSet<u16>) -> Option<u16> {
    (start..=u16::MAX).find(|port| !used.contains(port) && TcpListener::bind(("0.0.0.0", *port)).is_ok())
}
