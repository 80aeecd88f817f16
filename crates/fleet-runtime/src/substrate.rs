//! The substrate seam: what differs between local processes, containers
//! and pods.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, Service};

use crate::error::RuntimeResult;

/// Which substrate a runtime drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Docker,
    Kubernetes,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Docker => "docker",
            BackendKind::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything a substrate needs to start one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Display name, `<group>-<index>`.
    pub service: String,
    pub group: String,
    pub port: u16,
    pub memory_mb: u32,
    /// Prepared working directory holding the artifact.
    pub work_dir: PathBuf,
    /// Expanded command line, run inside `work_dir`.
    pub command: Vec<String>,
}

#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Whether this substrate is usable here. Bounded to about a second;
    /// any failure means "no".
    async fn runnable(&self) -> bool;

    /// One-time setup after selection (e.g. creating a namespace).
    async fn prepare_environment(&self) -> RuntimeResult<()> {
        Ok(())
    }

    /// Start the execution unit and return its handle.
    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle>;

    /// Forcibly stop the unit behind `handle`, escalating after `grace`.
    async fn terminate(
        &self,
        service: &Service,
        handle: &BackendHandle,
        grace: Duration,
    ) -> RuntimeResult<()>;

    /// Where the health detector should connect to reach `service`.
    async fn probe_address(&self, service: &Service) -> Option<SocketAddr>;
}
