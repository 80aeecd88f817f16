//! Kubernetes substrate, driven through `kubectl`.
//!
//! Each service becomes a single Pod in the configured namespace. The
//! service working directory is mounted through `hostPath`, so the daemon
//! must run on the node that schedules the pods (the usual in-cluster
//! DaemonSet deployment).

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::config::KubernetesSection;
use fleet_core::{BackendHandle, Service};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::command::{self, args};
use crate::error::{RuntimeError, RuntimeResult};
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

const CONTAINER_WORKDIR: &str = "/srv";
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const CLI_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KubernetesSubstrate {
    namespace: String,
    image: String,
}

impl KubernetesSubstrate {
    pub fn new(config: &KubernetesSection) -> Self {
        Self {
            namespace: config.namespace.clone(),
            image: config.image.clone(),
        }
    }

    fn api_server() -> Option<String> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok()?;
        Some(if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        })
    }

    /// Pod names must be DNS labels.
    fn pod_name(service: &str) -> String {
        service.to_ascii_lowercase().replace('_', "-")
    }

    fn manifest(&self, spec: &LaunchSpec) -> RuntimeResult<Value> {
        let host_dir = std::path::absolute(&spec.work_dir)?;
        Ok(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": Self::pod_name(&spec.service),
                "namespace": self.namespace,
                "labels": {
                    "app.kubernetes.io/managed-by": "fleet",
                    "fleet/group": Self::pod_name(&spec.group),
                    "fleet/service": Self::pod_name(&spec.service),
                }
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "server",
                    "image": self.image,
                    "command": spec.command,
                    "workingDir": CONTAINER_WORKDIR,
                    "ports": [{ "containerPort": spec.port, "protocol": "TCP" }],
                    "resources": {
                        "limits": { "memory": format!("{}Mi", spec.memory_mb + spec.memory_mb / 4) }
                    },
                    "volumeMounts": [{ "name": "work", "mountPath": CONTAINER_WORKDIR }]
                }],
                "volumes": [{
                    "name": "work",
                    "hostPath": { "path": host_dir.display().to_string(), "type": "Directory" }
                }]
            }
        }))
    }

    async fn pod_ip(&self, name: &str) -> Option<String> {
        let get = args![
            "get",
            "pod",
            name,
            "-n",
            self.namespace,
            "-o",
            "jsonpath={.status.podIP}"
        ];
        match command::run("kubectl", &get, None, PROBE_TIMEOUT).await {
            Ok(ip) if !ip.is_empty() => Some(ip),
            Ok(_) => None,
            Err(e) => {
                debug!(pod = %name, error = %e, "pod IP lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl Substrate for KubernetesSubstrate {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    async fn runnable(&self) -> bool {
        let Some(api) = Self::api_server() else {
            debug!("not running inside a cluster");
            return false;
        };
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&api)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(%api, error = %e, "kubernetes API unreachable");
                false
            }
            Err(_) => {
                debug!(%api, "kubernetes API probe timed out");
                false
            }
        }
    }

    async fn prepare_environment(&self) -> RuntimeResult<()> {
        let get = args!["get", "namespace", self.namespace];
        if command::run("kubectl", &get, None, CLI_TIMEOUT).await.is_ok() {
            return Ok(());
        }
        command::run("kubectl", &args!["create", "namespace", self.namespace], None, CLI_TIMEOUT).await?;
        info!(namespace = %self.namespace, "namespace created");
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle> {
        if spec.command.is_empty() {
            return Err(RuntimeError::Launch {
                service: spec.service.clone(),
                reason: "empty command line".to_string(),
            });
        }
        let name = Self::pod_name(&spec.service);
        let manifest = self.manifest(spec)?.to_string();

        command::run(
            "kubectl",
            &args!["apply", "-n", self.namespace, "-f", "-"],
            Some(manifest.as_bytes()),
            CLI_TIMEOUT,
        )
        .await
        .map_err(|e| RuntimeError::Launch {
            service: spec.service.clone(),
            reason: e.to_string(),
        })?;

        info!(service = %spec.service, pod = %name, namespace = %self.namespace, "pod created");
        Ok(BackendHandle::Pod {
            namespace: self.namespace.clone(),
            name,
        })
    }

    async fn terminate(
        &self,
        service: &Service,
        handle: &BackendHandle,
        grace: Duration,
    ) -> RuntimeResult<()> {
        let BackendHandle::Pod { namespace, name } = handle else {
            return Err(RuntimeError::Terminate {
                service: service.name(),
                reason: format!("{handle} is not a pod"),
            });
        };

        let delete = args![
            "delete",
            "pod",
            name,
            "-n",
            namespace,
            "--ignore-not-found",
            format!("--grace-period={}", grace.as_secs()),
        ];
        let Err(e) = command::run("kubectl", &delete, None, grace + CLI_TIMEOUT).await else {
            debug!(service = %service.name(), pod = %name, "pod deleted");
            return Ok(());
        };

        warn!(service = %service.name(), pod = %name, error = %e, "pod delete failed, forcing");
        let force = args![
            "delete",
            "pod",
            name,
            "-n",
            namespace,
            "--ignore-not-found",
            "--force",
            "--grace-period=0",
        ];
        command::run("kubectl", &force, None, CLI_TIMEOUT)
            .await
            .map_err(|e| RuntimeError::Terminate {
                service: service.name(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        let ip = self.pod_ip(&Self::pod_name(&service.name())).await?;
        format!("{ip}:{}", service.port).parse().ok()
    }
}
