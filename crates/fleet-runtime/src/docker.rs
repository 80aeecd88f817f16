//! Docker substrate, driven through the `docker` CLI.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, Service};
use fleet_core::config::DockerSection;
use tracing::{debug, info, warn};

use crate::command::{self, args};
use crate::error::{RuntimeError, RuntimeResult};
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

/// Mount point of the service working directory inside the container.
const CONTAINER_WORKDIR: &str = "/srv";
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const CLI_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DockerSubstrate {
    image: String,
    prefix: String,
}

impl DockerSubstrate {
    pub fn new(config: &DockerSection) -> Self {
        Self {
            image: config.image.clone(),
            prefix: config.container_prefix.clone(),
        }
    }

    fn container_name(&self, service: &str) -> String {
        format!("{}-{service}", self.prefix)
    }

    fn socket_present() -> bool {
        std::env::var_os("DOCKER_HOST").is_some() || Path::new("/var/run/docker.sock").exists()
    }

    /// Arguments for `docker run`.
    fn run_args(&self, spec: &LaunchSpec) -> RuntimeResult<Vec<String>> {
        let host_dir = std::path::absolute(&spec.work_dir)?;
        let mut run = args![
            "run",
            "-d",
            "--name",
            self.container_name(&spec.service),
            "--label",
            format!("fleet.group={}", spec.group),
            "--label",
            format!("fleet.service={}", spec.service),
            "--memory",
            // Heap plus headroom for the JVM itself.
            format!("{}m", spec.memory_mb + spec.memory_mb / 4),
            "-p",
            format!("{}:{}", spec.port, spec.port),
            "-v",
            format!("{}:{CONTAINER_WORKDIR}", host_dir.display()),
            "-w",
            CONTAINER_WORKDIR,
            self.image,
        ];
        run.extend(spec.command.iter().cloned());
        Ok(run)
    }
}

#[async_trait]
impl Substrate for DockerSubstrate {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn runnable(&self) -> bool {
        if !Self::socket_present() {
            debug!("no docker socket");
            return false;
        }
        match command::run("docker", &args!["info", "--format", "{{.ServerVersion}}"], None, PROBE_TIMEOUT).await {
            Ok(version) => {
                debug!(%version, "docker daemon reachable");
                true
            }
            Err(e) => {
                debug!(error = %e, "docker daemon unreachable");
                false
            }
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle> {
        if spec.command.is_empty() {
            return Err(RuntimeError::Launch {
                service: spec.service.clone(),
                reason: "empty command line".to_string(),
            });
        }
        let name = self.container_name(&spec.service);

        // A container left behind by a crashed daemon would block the name.
        let _ = command::run("docker", &args!["rm", "-f", name], None, CLI_TIMEOUT).await;

        let id = command::run("docker", &self.run_args(spec)?, None, CLI_TIMEOUT)
            .await
            .map_err(|e| RuntimeError::Launch {
                service: spec.service.clone(),
                reason: e.to_string(),
            })?;

        info!(service = %spec.service, container = %id, image = %self.image, "container started");
        Ok(BackendHandle::Container { id })
    }

    async fn terminate(
        &self,
        service: &Service,
        handle: &BackendHandle,
        grace: Duration,
    ) -> RuntimeResult<()> {
        let BackendHandle::Container { id } = handle else {
            return Err(RuntimeError::Terminate {
                service: service.name(),
                reason: format!("{handle} is not a container"),
            });
        };

        let stop = args!["stop", "-t", grace.as_secs(), id];
        if let Err(e) = command::run("docker", &stop, None, grace + CLI_TIMEOUT).await {
            warn!(service = %service.name(), container = %id, error = %e, "docker stop failed, killing");
            if let Err(e) = command::run("docker", &args!["kill", id], None, CLI_TIMEOUT).await {
                debug!(container = %id, error = %e, "docker kill failed");
            }
        }

        command::run("docker", &args!["rm", "-f", id], None, CLI_TIMEOUT)
            .await
            .map_err(|e| RuntimeError::Terminate {
                service: service.name(),
                reason: e.to_string(),
            })?;
        debug!(service = %service.name(), container = %id, "container removed");
        Ok(())
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        // Ports are published one-to-one on the host.
        Some(SocketAddr::from((Ipv4Addr::LOCALHOST, service.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_mount_and_publish() {
        let docker = DockerSubstrate::new(&DockerSection::default());
        let spec = LaunchSpec {
            service: "lobby-1".to_string(),
            group: "lobby".to_string(),
            port: 30001,
            memory_mb: 1024,
            work_dir: "/data/temp/lobby-1-x".into(),
            command: vec!["java".into(), "-jar".into(), "paper.jar".into()],
        };
        let run = docker.run_args(&spec).unwrap();

        let pos = |flag: &str| run.iter().position(|a| a == flag).unwrap();
        assert_eq!(run[pos("--name") + 1], "fleet-lobby-1");
        assert_eq!(run[pos("-p") + 1], "30001:30001");
        assert_eq!(run[pos("-v") + 1], "/data/temp/lobby-1-x:/srv");
        assert_eq!(run[pos("--memory") + 1], "1280m");
        assert_eq!(
            &run[run.len() - 4..],
            ["eclipse-temurin:21-jre", "java", "-jar", "paper.jar"]
        );
    }

    #[tokio::test]
    async fn foreign_handles_are_rejected() {
        let docker = DockerSubstrate::new(&DockerSection::default());
        let service = Service::new("lobby", 1, 30001, Path::new("/tmp"));
        let handle = BackendHandle::Process { pid: 1 };
        assert!(docker
            .terminate(&service, &handle, Duration::from_secs(1))
            .await
            .is_err());
    }
}
