//! The runtime backend contract and its one generic implementation.
//!
//! `Runtime<S>` owns the parts every substrate shares: the boot sequence
//! (platform resolution, working directory, launch, state transition) and
//! the shutdown sequence (STOPPING, terminate, cleanup, removal). A
//! [`Substrate`] only decides how an execution unit is started, stopped and
//! reached.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, Group, Service, ServiceState};
use fleet_platform::{PlatformResolver, ResolvedPlatform};
use fleet_state::{GroupRegistry, RegistryError, ServiceRegistry};
use tracing::{debug, error, info, warn};

use crate::error::RuntimeResult;
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

/// What the scheduler, the health detector and the operator facade need
/// from whichever backend was selected at startup.
#[async_trait]
pub trait RuntimeBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Substrate self-test, bounded to about a second.
    async fn runnable(&self) -> bool;

    fn service_storage(&self) -> &ServiceRegistry;

    fn group_storage(&self) -> &GroupRegistry;

    fn platforms(&self) -> &PlatformResolver;

    /// Bring a PREPARING service up. A service in any other state is left
    /// alone. On failure the service stays PREPARING.
    async fn boot_application(&self, service: &str) -> RuntimeResult<()>;

    /// Tear a service down and remove it. Safe to call repeatedly.
    async fn shutdown_application(&self, service: &str) -> RuntimeResult<()>;

    /// Address a reachability probe should connect to.
    async fn probe_address(&self, service: &Service) -> Option<SocketAddr>;

    /// Shut down every registered service.
    async fn shutdown_all(&self) {
        for service in self.service_storage().items().await {
            let name = service.name();
            if let Err(e) = self.shutdown_application(&name).await {
                warn!(service = %name, error = %e, "shutdown failed");
            }
        }
    }
}

pub struct Runtime<S: Substrate> {
    substrate: S,
    groups: GroupRegistry,
    services: ServiceRegistry,
    platforms: Arc<PlatformResolver>,
    termination_grace: Duration,
}

impl<S: Substrate> Runtime<S> {
    pub fn new(
        substrate: S,
        groups: GroupRegistry,
        services: ServiceRegistry,
        platforms: Arc<PlatformResolver>,
        termination_grace: Duration,
    ) -> Self {
        info!(backend = %substrate.kind(), "runtime initialized");
        Self {
            substrate,
            groups,
            services,
            platforms,
            termination_grace,
        }
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Remove working directories left behind by a previous run.
    pub async fn clean_work_root(&self) -> RuntimeResult<()> {
        let root = self.services.work_root();
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => debug!(path = ?root, "stale working directories removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(root).await?;
        Ok(())
    }

    async fn launch(&self, service: &Service) -> RuntimeResult<BackendHandle> {
        let group = self
            .groups
            .find(&service.group)
            .await
            .ok_or_else(|| RegistryError::GroupNotFound(service.group.clone()))?;

        let resolved = self.platforms.resolve(&group.platform)?;
        let artifact = self.platforms.prepare(&group.platform).await?;
        materialize(service, &resolved, &artifact, group.memory_mb).await?;

        let spec = LaunchSpec {
            service: service.name(),
            group: group.name.clone(),
            port: service.port,
            memory_mb: group.memory_mb,
            work_dir: service.work_dir.clone(),
            command: resolved.command_line(service.port, group.memory_mb),
        };
        debug!(service = %spec.service, command = ?spec.command, "launching");
        self.substrate.launch(&spec).await
    }

    async fn release(&self, service: &Service) {
        match tokio::fs::remove_dir_all(&service.work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(service = %service.name(), path = ?service.work_dir, error = %e, "working directory not removed")
            }
        }
    }
}

/// Fill a fresh working directory with the artifact and the platform's
/// static files.
async fn materialize(
    service: &Service,
    resolved: &ResolvedPlatform,
    artifact: &Path,
    memory_mb: u32,
) -> RuntimeResult<()> {
    tokio::fs::create_dir_all(&service.work_dir).await?;
    tokio::fs::copy(artifact, service.work_dir.join(resolved.file_name())).await?;
    for (file, content) in resolved.rendered_files(service.port, memory_mb) {
        tokio::fs::write(service.work_dir.join(file), content).await?;
    }
    Ok(())
}

#[async_trait]
impl<S: Substrate> RuntimeBackend for Runtime<S> {
    fn kind(&self) -> BackendKind {
        self.substrate.kind()
    }

    async fn runnable(&self) -> bool {
        self.substrate.runnable().await
    }

    fn service_storage(&self) -> &ServiceRegistry {
        &self.services
    }

    fn group_storage(&self) -> &GroupRegistry {
        &self.groups
    }

    fn platforms(&self) -> &PlatformResolver {
        &self.platforms
    }

    async fn boot_application(&self, name: &str) -> RuntimeResult<()> {
        let service = self
            .services
            .find(name)
            .await
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))?;
        if service.state != ServiceState::Preparing {
            error!(service = %name, state = %service.state, "boot requested for a service that is not preparing");
            return Ok(());
        }

        let handle = match self.launch(&service).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release(&service).await;
                return Err(e);
            }
        };

        match self.services.mark_starting(&service, handle.clone()).await {
            Ok(_) => {
                info!(service = %name, %handle, port = service.port, "service starting");
                Ok(())
            }
            Err(e) => {
                // Shut down, or replaced, while we were launching; undo the launch.
                warn!(service = %name, error = %e, "service changed during boot, terminating unit");
                if let Err(e) = self
                    .substrate
                    .terminate(&service, &handle, self.termination_grace)
                    .await
                {
                    warn!(service = %name, error = %e, "orphaned unit not terminated");
                }
                self.release(&service).await;
                Err(e.into())
            }
        }
    }

    async fn shutdown_application(&self, name: &str) -> RuntimeResult<()> {
        match self.services.find(name).await {
            None => {
                debug!(service = %name, "shutdown of unknown service ignored");
                return Ok(());
            }
            Some(service) if service.state == ServiceState::Stopping => {
                debug!(service = %name, "shutdown already in progress");
                return Ok(());
            }
            Some(_) => {}
        }

        let service = match self.services.set_state(name, ServiceState::Stopping).await {
            Ok(service) => service,
            // Lost a race with another shutdown.
            Err(RegistryError::IllegalStateTransition { .. } | RegistryError::ServiceNotFound(_)) => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(handle) = &service.handle {
            if let Err(e) = self
                .substrate
                .terminate(&service, handle, self.termination_grace)
                .await
            {
                warn!(service = %name, %handle, error = %e, "termination incomplete");
            }
        }
        self.release(&service).await;
        self.services.drop_service(name).await?;
        info!(service = %name, "service stopped");
        Ok(())
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        self.substrate.probe_address(service).await
    }
}

/// Convenience for callers holding a group rather than a service: reserve
/// a slot and boot it.
pub async fn start_one<B: RuntimeBackend + ?Sized>(backend: &B, group: &Group) -> RuntimeResult<Service> {
    let service = backend.service_storage().reserve(group).await?;
    backend.boot_application(&service.name()).await?;
    Ok(service)
}
