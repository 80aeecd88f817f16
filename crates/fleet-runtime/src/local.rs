//! Local-process substrate. Always runnable; the universal fallback.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, Service};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

/// Runs each service as a child process of the daemon.
#[derive(Default)]
pub struct LocalSubstrate {
    children: Mutex<HashMap<u32, Child>>,
}

impl LocalSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of children still tracked.
    pub async fn tracked(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[async_trait]
impl Substrate for LocalSubstrate {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn runnable(&self) -> bool {
        true
    }

    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle> {
        let (program, args) = spec.command.split_first().ok_or_else(|| RuntimeError::Launch {
            service: spec.service.clone(),
            reason: "empty command line".to_string(),
        })?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Launch {
                service: spec.service.clone(),
                reason: format!("{program}: {e}"),
            })?;

        let pid = child.id().ok_or_else(|| RuntimeError::Launch {
            service: spec.service.clone(),
            reason: "process exited immediately".to_string(),
        })?;

        self.children.lock().await.insert(pid, child);
        info!(service = %spec.service, pid, "process started");
        Ok(BackendHandle::Process { pid })
    }

    async fn terminate(
        &self,
        service: &Service,
        handle: &BackendHandle,
        grace: Duration,
    ) -> RuntimeResult<()> {
        let BackendHandle::Process { pid } = handle else {
            return Err(RuntimeError::Terminate {
                service: service.name(),
                reason: format!("{handle} is not a local process"),
            });
        };

        let Some(mut child) = self.children.lock().await.remove(pid) else {
            debug!(service = %service.name(), pid, "process already gone");
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            // Already exited and reaped by the OS.
            debug!(service = %service.name(), pid, error = %e, "kill not delivered");
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(service = %service.name(), pid, %status, "process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(RuntimeError::Terminate {
                service: service.name(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(service = %service.name(), pid, "process not reaped within grace period");
                Err(RuntimeError::Timeout {
                    what: format!("termination of {}", service.name()),
                    after: grace,
                })
            }
        }
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        Some(SocketAddr::from((Ipv4Addr::LOCALHOST, service.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn spec(dir: &Path, command: &[&str]) -> LaunchSpec {
        LaunchSpec {
            service: "lobby-1".to_string(),
            group: "lobby".to_string(),
            port: 41700,
            memory_mb: 512,
            work_dir: dir.to_path_buf(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn service(dir: &Path) -> Service {
        Service::new("lobby", 1, 41700, dir)
    }

    #[tokio::test]
    async fn launch_and_kill_a_process() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubstrate::new();

        let handle = local.launch(&spec(dir.path(), &["sleep", "30"])).await.unwrap();
        assert!(matches!(handle, BackendHandle::Process { .. }));
        assert_eq!(local.tracked().await, 1);

        local
            .terminate(&service(dir.path()), &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(local.tracked().await, 0);

        // Second termination finds nothing to do.
        local
            .terminate(&service(dir.path()), &handle, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn launch_runs_in_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubstrate::new();

        let handle = local
            .launch(&spec(dir.path(), &["touch", "started"]))
            .await
            .unwrap();
        local
            .terminate(&service(dir.path()), &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(dir.path().join("started").exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubstrate::new();
        let err = local
            .launch(&spec(dir.path(), &["fleet-no-such-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Launch { .. }));

        let err = local.launch(&spec(dir.path(), &[])).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Launch { .. }));
    }

    #[tokio::test]
    async fn foreign_handles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubstrate::new();
        let handle = BackendHandle::Container { id: "abc".to_string() };
        assert!(local
            .terminate(&service(dir.path()), &handle, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn probes_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let addr = LocalSubstrate::new()
            .probe_address(&service(dir.path()))
            .await
            .unwrap();
        assert_eq!(addr, "127.0.0.1:41700".parse().unwrap());
    }
}
