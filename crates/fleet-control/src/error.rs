//! Operator-facing errors. Messages are shown to the operator as-is.

use fleet_runtime::RuntimeError;
use fleet_state::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("a group named '{0}' already exists")]
    GroupExists(String),

    #[error("there is no group named '{0}'")]
    GroupNotFound(String),

    #[error("there is no service named '{0}'")]
    ServiceNotFound(String),

    #[error("invalid group: {0}")]
    InvalidGroup(String),

    #[error("unknown platform {0}")]
    UnknownPlatform(String),

    #[error("cannot set '{field}' to '{value}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("operation failed: {0}")]
    Internal(String),
}

impl From<RegistryError> for ControlError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateGroup(name) => ControlError::GroupExists(name),
            RegistryError::GroupNotFound(name) => ControlError::GroupNotFound(name),
            RegistryError::ServiceNotFound(name) => ControlError::ServiceNotFound(name),
            RegistryError::InvalidGroup(reason) => ControlError::InvalidGroup(reason.to_string()),
            other => ControlError::Internal(other.to_string()),
        }
    }
}

impl From<RuntimeError> for ControlError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Registry(inner) => inner.into(),
            other => ControlError::Internal(other.to_string()),
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
