//! Error types for the Fleet state layer.

use fleet_core::{InvalidGroup, ServiceId, ServiceState};
use thiserror::Error;

/// Result type alias for group store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the redb-backed group store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by the group and service registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("group already exists: {0}")]
    DuplicateGroup(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("service already registered: {0}")]
    DuplicateService(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("invalid group: {0}")]
    InvalidGroup(#[from] InvalidGroup),

    #[error("service {service} is no longer instance {expected}")]
    ServiceReplaced { service: String, expected: ServiceId },

    #[error("illegal state transition for {service}: {from} -> {to}")]
    IllegalStateTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    #[error("service {service} cannot be removed while {state}")]
    NotStopping { service: String, state: ServiceState },

    #[error("no free port at or above {0}")]
    NoFreePort(u16),

    #[error("store error: {0}")]
    Store(#[from] StateError),
}
