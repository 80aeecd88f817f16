//! Shared domain types used across Fleet crates.
//!
//! Groups are durable templates; services are the live instances the
//! runtime creates from them. A service refers to its group by name only,
//! so "services of a group" is always a query against the service
//! registry rather than a collection stored on the group.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of a group (identity key, immutable after creation).
pub type GroupName = String;

/// Display name of a service, `<group>-<index>`.
pub type ServiceName = String;

/// Identity of one service incarnation. Display names are reused, ids never.
pub type ServiceId = Uuid;

/// Group property that suspends automatic service creation.
pub const MAINTENANCE_PROPERTY: &str = "maintenance";

// ── Group ─────────────────────────────────────────────────────────

/// Reference to a platform build a group runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformRef {
    pub name: String,
    pub version: String,
}

impl PlatformRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PlatformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// A named template describing a class of services and their capacity bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: GroupName,
    pub min_online: u32,
    pub max_online: u32,
    pub platform: PlatformRef,
    /// Maximum heap handed to the platform process (megabytes).
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    /// Free-form operational flags.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_memory_mb() -> u32 {
    1024
}

/// Reasons a group definition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidGroup {
    #[error("group name must not be empty")]
    EmptyName,

    #[error("group name {0:?} may only contain ASCII letters, digits, '-' and '_'")]
    BadName(String),

    #[error("min online ({min}) exceeds max online ({max})")]
    Capacity { min: u32, max: u32 },

    #[error("platform reference must name a platform and a version")]
    EmptyPlatform,
}

impl Group {
    /// Create a group with default memory and no properties.
    pub fn new(name: impl Into<String>, min_online: u32, max_online: u32, platform: PlatformRef) -> Self {
        Self {
            name: name.into(),
            min_online,
            max_online,
            platform,
            memory_mb: default_memory_mb(),
            properties: BTreeMap::new(),
        }
    }

    /// Check the invariants every stored group must satisfy.
    pub fn validate(&self) -> Result<(), InvalidGroup> {
        if self.name.is_empty() {
            return Err(InvalidGroup::EmptyName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidGroup::BadName(self.name.clone()));
        }
        if self.min_online > self.max_online {
            return Err(InvalidGroup::Capacity {
                min: self.min_online,
                max: self.max_online,
            });
        }
        if self.platform.name.trim().is_empty() || self.platform.version.trim().is_empty() {
            return Err(InvalidGroup::EmptyPlatform);
        }
        Ok(())
    }

    /// Whether automatic service creation is suspended for this group.
    pub fn in_maintenance(&self) -> bool {
        self.properties
            .get(MAINTENANCE_PROPERTY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

// ── Service ───────────────────────────────────────────────────────

/// Lifecycle state of a service.
///
/// ```text
/// PREPARING → STARTING → ONLINE
///     └──────────┴──────────┴──→ STOPPING → (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Preparing,
    Starting,
    Online,
    Stopping,
}

impl ServiceState {
    /// Whether `self → next` is an edge of the lifecycle state machine.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Preparing, Starting)
                | (Starting, Online)
                | (Preparing, Stopping)
                | (Starting, Stopping)
                | (Online, Stopping)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceState::Preparing => "PREPARING",
            ServiceState::Starting => "STARTING",
            ServiceState::Online => "ONLINE",
            ServiceState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Substrate-specific reference to a running execution unit.
///
/// Opaque to the scheduler and health detector; only the backend that
/// produced it interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendHandle {
    Process { pid: u32 },
    Container { id: String },
    Pod { namespace: String, name: String },
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHandle::Process { pid } => write!(f, "pid {pid}"),
            BackendHandle::Container { id } => write!(f, "container {id}"),
            BackendHandle::Pod { namespace, name } => write!(f, "pod {namespace}/{name}"),
        }
    }
}

/// One instance of a group's platform artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    /// Owning group (by name).
    pub group: GroupName,
    /// Per-group index; the lowest free positive integer at deploy time.
    pub index: u32,
    pub host: String,
    pub port: u16,
    pub state: ServiceState,
    /// Set when leaving PREPARING, cleared when leaving STOPPING.
    pub handle: Option<BackendHandle>,
    /// Isolated working directory owned by this service.
    pub work_dir: PathBuf,
}

impl Service {
    /// A fresh PREPARING service for `group`.
    pub fn new(group: &str, index: u32, port: u16, work_root: &std::path::Path) -> Self {
        let id = Uuid::new_v4();
        let name = service_name(group, index);
        Self {
            id,
            group: group.to_string(),
            index,
            host: "127.0.0.1".to_string(),
            port,
            state: ServiceState::Preparing,
            handle: None,
            work_dir: work_root.join(format!("{name}-{id}")),
        }
    }

    /// Display name, `<group>-<index>`.
    pub fn name(&self) -> ServiceName {
        service_name(&self.group, self.index)
    }
}

/// Build a service display name.
pub fn service_name(group: &str, index: u32) -> ServiceName {
    format!("{group}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> Group {
        Group::new("lobby", 2, 5, PlatformRef::new("paper", "1.21"))
    }

    #[test]
    fn valid_group_passes() {
        assert_eq!(lobby().validate(), Ok(()));
    }

    #[test]
    fn min_above_max_is_rejected() {
        let mut group = lobby();
        group.min_online = 6;
        assert_eq!(
            group.validate(),
            Err(InvalidGroup::Capacity { min: 6, max: 5 })
        );
    }

    #[test]
    fn zero_capacity_is_valid() {
        let mut group = lobby();
        group.min_online = 0;
        group.max_online = 0;
        assert!(group.validate().is_ok());
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let mut group = lobby();
        group.name = "../etc".to_string();
        assert!(matches!(group.validate(), Err(InvalidGroup::BadName(_))));
        group.name = String::new();
        assert_eq!(group.validate(), Err(InvalidGroup::EmptyName));
    }

    #[test]
    fn maintenance_flag_is_case_insensitive() {
        let mut group = lobby();
        assert!(!group.in_maintenance());
        group
            .properties
            .insert(MAINTENANCE_PROPERTY.to_string(), "TRUE".to_string());
        assert!(group.in_maintenance());
    }

    #[test]
    fn state_machine_edges() {
        use ServiceState::*;
        assert!(Preparing.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Online));
        assert!(Online.can_transition_to(Stopping));
        assert!(Preparing.can_transition_to(Stopping));

        assert!(!Preparing.can_transition_to(Online));
        assert!(!Online.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Online));
        assert!(!Stopping.can_transition_to(Stopping));
        assert!(!Online.can_transition_to(Online));
    }

    #[test]
    fn service_name_uses_index() {
        let svc = Service::new("lobby", 2, 30000, std::path::Path::new("/tmp/fleet"));
        assert_eq!(svc.name(), "lobby-2");
        assert_eq!(svc.state, ServiceState::Preparing);
        assert!(svc.handle.is_none());
        assert!(svc.work_dir.starts_with("/tmp/fleet"));
    }

    #[test]
    fn group_defaults_when_deserializing() {
        let json = r#"{"name":"proxy","min_online":1,"max_online":1,
            "platform":{"name":"velocity","version":"3.4.0"}}"#;
        let group: Group = serde_json::from_str(json).unwrap();
        assert_eq!(group.memory_mb, 1024);
        assert!(group.properties.is_empty());
    }
}
