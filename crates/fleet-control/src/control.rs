//! The operator facade over the registries and the active backend.

use std::sync::Arc;

use fleet_core::{Group, MAINTENANCE_PROPERTY, PlatformRef, Service, ServiceState};
use fleet_platform::Platform;
use fleet_runtime::RuntimeBackend;
use fleet_state::{EventBus, FleetEvent};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{ControlError, ControlResult};

/// Passes over a group's services while draining it. A second pass picks
/// up anything reserved while the first ran.
const DRAIN_PASSES: usize = 3;

/// A single edit to a group definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupUpdate {
    MinOnline(u32),
    MaxOnline(u32),
    Memory(u32),
    Maintenance(bool),
    Platform(PlatformRef),
    Property { key: String, value: Option<String> },
}

impl GroupUpdate {
    /// Parse a terminal `edit <field> <value>` pair. For `property`,
    /// `key=value` sets a property and a bare `key` removes it.
    pub fn parse(field: &str, value: &str) -> ControlResult<Self> {
        let invalid = |reason: &str| ControlError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let number = || value.parse::<u32>().map_err(|_| invalid("expected a number"));

        match field {
            "min" | "minOnline" => Ok(GroupUpdate::MinOnline(number()?)),
            "max" | "maxOnline" => Ok(GroupUpdate::MaxOnline(number()?)),
            "memory" => match number()? {
                0 => Err(invalid("memory must be positive")),
                mb => Ok(GroupUpdate::Memory(mb)),
            },
            "maintenance" => value
                .parse::<bool>()
                .map(GroupUpdate::Maintenance)
                .map_err(|_| invalid("expected true or false")),
            "platform" => {
                let (name, version) = value
                    .split_once(':')
                    .ok_or_else(|| invalid("expected <name>:<version>"))?;
                Ok(GroupUpdate::Platform(PlatformRef::new(name, version)))
            }
            "property" => {
                let (key, value) = match value.split_once('=') {
                    Some((key, value)) => (key, Some(value.to_string())),
                    None => (value, None),
                };
                if key.is_empty() {
                    return Err(invalid("expected <key>=<value> or <key>"));
                }
                Ok(GroupUpdate::Property {
                    key: key.to_string(),
                    value,
                })
            }
            _ => Err(invalid("unknown field")),
        }
    }

    fn apply(self, group: &mut Group) {
        match self {
            GroupUpdate::MinOnline(n) => group.min_online = n,
            GroupUpdate::MaxOnline(n) => group.max_online = n,
            GroupUpdate::Memory(mb) => group.memory_mb = mb,
            GroupUpdate::Maintenance(on) => {
                if on {
                    group
                        .properties
                        .insert(MAINTENANCE_PROPERTY.to_string(), "true".to_string());
                } else {
                    group.properties.remove(MAINTENANCE_PROPERTY);
                }
            }
            GroupUpdate::Platform(platform) => group.platform = platform,
            GroupUpdate::Property { key, value: Some(value) } => {
                group.properties.insert(key, value);
            }
            GroupUpdate::Property { key, value: None } => {
                group.properties.remove(&key);
            }
        }
    }
}

/// Imperative operations for an operator front end.
pub struct FleetControl<B: RuntimeBackend> {
    backend: Arc<B>,
    events: EventBus,
}

impl<B: RuntimeBackend> Clone for FleetControl<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            events: self.events.clone(),
        }
    }
}

impl<B: RuntimeBackend> FleetControl<B> {
    pub fn new(backend: Arc<B>, events: EventBus) -> Self {
        Self { backend, events }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.backend.group_storage().list().await
    }

    pub async fn group(&self, name: &str) -> ControlResult<Group> {
        self.backend
            .group_storage()
            .find(name)
            .await
            .ok_or_else(|| ControlError::GroupNotFound(name.to_string()))
    }

    /// Create a group after checking its platform against the catalogue.
    pub async fn create_group(&self, group: Group) -> ControlResult<Group> {
        self.check_platform(&group.platform)?;
        Ok(self.backend.group_storage().create(group).await?)
    }

    pub async fn update_group(&self, name: &str, update: GroupUpdate) -> ControlResult<Group> {
        let mut group = self.group(name).await?;
        if let GroupUpdate::Platform(platform) = &update {
            self.check_platform(platform)?;
        }
        update.apply(&mut group);
        let group = self.backend.group_storage().update(group).await?;
        info!(group = %name, "group edited");
        Ok(group)
    }

    /// Stop every service of the group, then delete it.
    pub async fn destroy_group(&self, name: &str) -> ControlResult<Group> {
        let backend = self.backend.clone();
        let group = self
            .backend
            .group_storage()
            .destroy(name, |group| async move {
                drain(backend.as_ref(), &group.name).await;
            })
            .await?;
        Ok(group)
    }

    pub async fn services(&self) -> Vec<Service> {
        self.backend.service_storage().items().await
    }

    pub async fn services_of(&self, group: &str) -> ControlResult<Vec<Service>> {
        self.group(group).await?;
        Ok(self.backend.service_storage().find_by_group(group).await)
    }

    pub async fn service(&self, name: &str) -> ControlResult<Service> {
        self.backend
            .service_storage()
            .find(name)
            .await
            .ok_or_else(|| ControlError::ServiceNotFound(name.to_string()))
    }

    /// Force a service down. A service already stopping is not an error.
    pub async fn shutdown_service(&self, name: &str) -> ControlResult<()> {
        let service = self.service(name).await?;
        if service.state == ServiceState::Stopping {
            return Ok(());
        }
        self.backend.shutdown_application(name).await?;
        Ok(())
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.backend.platforms().catalogue().platforms.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    fn check_platform(&self, platform: &PlatformRef) -> ControlResult<()> {
        self.backend
            .platforms()
            .resolve(platform)
            .map(|_| ())
            .map_err(|e| ControlError::UnknownPlatform(format!("{platform} ({e})")))
    }
}

async fn drain<B: RuntimeBackend + ?Sized>(backend: &B, group: &str) {
    for _ in 0..DRAIN_PASSES {
        let services = backend.service_storage().find_by_group(group).await;
        if services.is_empty() {
            return;
        }
        for service in services {
            let name = service.name();
            if let Err(e) = backend.shutdown_application(&name).await {
                warn!(group, service = %name, error = %e, "service not stopped while draining");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_runtime::start_one;
    use fleet_runtime::testing::{FakeSubstrate, fixture};

    async fn control(port_start: u16) -> (FleetControl<fleet_runtime::Runtime<FakeSubstrate>>, fleet_runtime::testing::Fixture<FakeSubstrate>) {
        let fx = fixture(FakeSubstrate::new(), port_start).await.unwrap();
        (FleetControl::new(fx.runtime.clone(), fx.events.clone()), fx)
    }

    fn lobby() -> Group {
        Group::new("lobby", 2, 5, PlatformRef::new("paper", "1.21"))
    }

    #[test]
    fn parse_edits() {
        assert_eq!(GroupUpdate::parse("min", "3").unwrap(), GroupUpdate::MinOnline(3));
        assert_eq!(
            GroupUpdate::parse("maintenance", "true").unwrap(),
            GroupUpdate::Maintenance(true)
        );
        assert_eq!(
            GroupUpdate::parse("platform", "paper:1.20.4").unwrap(),
            GroupUpdate::Platform(PlatformRef::new("paper", "1.20.4"))
        );
        assert!(GroupUpdate::parse("max", "many").is_err());
        assert!(GroupUpdate::parse("memory", "0").is_err());
        assert!(GroupUpdate::parse("colour", "red").is_err());
        assert_eq!(
            GroupUpdate::parse("property", "motd=Welcome").unwrap(),
            GroupUpdate::Property {
                key: "motd".to_string(),
                value: Some("Welcome".to_string())
            }
        );
        assert_eq!(
            GroupUpdate::parse("property", "motd").unwrap(),
            GroupUpdate::Property {
                key: "motd".to_string(),
                value: None
            }
        );
        assert!(GroupUpdate::parse("property", "=x").is_err());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_unknown_platforms() {
        let (control, _fx) = control(45000).await;
        control.create_group(lobby()).await.unwrap();

        let err = control.create_group(lobby()).await.unwrap_err();
        assert_eq!(err.to_string(), "a group named 'lobby' already exists");

        let bad = Group::new("modded", 1, 1, PlatformRef::new("forge", "1.21"));
        assert!(matches!(
            control.create_group(bad).await,
            Err(ControlError::UnknownPlatform(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_inverted_capacity() {
        let (control, _fx) = control(45020).await;
        let group = Group::new("lobby", 5, 2, PlatformRef::new("paper", "1.21"));
        assert!(matches!(
            control.create_group(group).await,
            Err(ControlError::InvalidGroup(_))
        ));
        assert!(control.groups().await.is_empty());
    }

    #[tokio::test]
    async fn update_enforces_capacity_invariant() {
        let (control, _fx) = control(45040).await;
        control.create_group(lobby()).await.unwrap();

        let err = control
            .update_group("lobby", GroupUpdate::MaxOnline(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidGroup(_)));
        assert_eq!(control.group("lobby").await.unwrap().max_online, 5);

        let group = control
            .update_group("lobby", GroupUpdate::Maintenance(true))
            .await
            .unwrap();
        assert!(group.in_maintenance());
    }

    #[tokio::test]
    async fn properties_are_set_and_removed() {
        let (control, _fx) = control(45120).await;
        control.create_group(lobby()).await.unwrap();

        let update = GroupUpdate::parse("property", "motd=Welcome").unwrap();
        let group = control.update_group("lobby", update).await.unwrap();
        assert_eq!(group.properties.get("motd").map(String::as_str), Some("Welcome"));
        assert_eq!(
            control.group("lobby").await.unwrap().properties.get("motd"),
            Some(&"Welcome".to_string())
        );

        let update = GroupUpdate::parse("property", "motd").unwrap();
        let group = control.update_group("lobby", update).await.unwrap();
        assert!(!group.properties.contains_key("motd"));
    }

    #[tokio::test]
    async fn destroy_stops_owned_services_first() {
        let (control, fx) = control(45060).await;
        let group = control.create_group(lobby()).await.unwrap();
        start_one(fx.runtime.as_ref(), &group).await.unwrap();
        start_one(fx.runtime.as_ref(), &group).await.unwrap();

        control.destroy_group("lobby").await.unwrap();

        assert!(control.services().await.is_empty());
        assert_eq!(fx.runtime.substrate().terminated().await.len(), 2);
        assert!(matches!(
            control.group("lobby").await,
            Err(ControlError::GroupNotFound(_))
        ));
        assert!(matches!(
            control.destroy_group("lobby").await,
            Err(ControlError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_of_unknown_service_is_rejected() {
        let (control, _fx) = control(45080).await;
        let err = control.shutdown_service("ghost-1").await.unwrap_err();
        assert_eq!(err.to_string(), "there is no service named 'ghost-1'");
    }

    #[tokio::test]
    async fn lists_builtin_platforms() {
        let (control, _fx) = control(45100).await;
        let names: Vec<_> = control.platforms().into_iter().map(|p| p.name).collect();
        assert!(names.contains(&"paper".to_string()));
        assert!(names.contains(&"velocity".to_string()));
    }
}
