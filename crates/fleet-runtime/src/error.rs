use std::time::Duration;

use fleet_platform::PlatformError;
use fleet_state::RegistryError;

/// Errors raised while booting or tearing down services.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("backend {backend} is not usable here: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("failed to launch {service}: {reason}")]
    Launch { service: String, reason: String },

    #[error("failed to terminate {service}: {reason}")]
    Terminate { service: String, reason: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("platform resolution failed: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
