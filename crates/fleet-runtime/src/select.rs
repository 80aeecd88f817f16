//! Startup backend selection by ordered probing.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, BackendPreference, FleetConfig, Service};
use tracing::{info, warn};

use crate::docker::DockerSubstrate;
use crate::error::{RuntimeError, RuntimeResult};
use crate::kubernetes::KubernetesSubstrate;
use crate::local::LocalSubstrate;
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

/// The substrate chosen at startup. Dispatch is a `match`, fixed for the
/// life of the process.
pub enum SelectedSubstrate {
    Local(LocalSubstrate),
    Docker(DockerSubstrate),
    Kubernetes(KubernetesSubstrate),
}

macro_rules! delegate {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            SelectedSubstrate::Local($inner) => $call,
            SelectedSubstrate::Docker($inner) => $call,
            SelectedSubstrate::Kubernetes($inner) => $call,
        }
    };
}

impl SelectedSubstrate {
    fn build(kind: BackendKind, config: &FleetConfig) -> Self {
        match kind {
            BackendKind::Local => Self::Local(LocalSubstrate::new()),
            BackendKind::Docker => Self::Docker(DockerSubstrate::new(&config.docker)),
            BackendKind::Kubernetes => Self::Kubernetes(KubernetesSubstrate::new(&config.kubernetes)),
        }
    }
}

#[async_trait]
impl Substrate for SelectedSubstrate {
    fn kind(&self) -> BackendKind {
        delegate!(self, s => s.kind())
    }

    async fn runnable(&self) -> bool {
        delegate!(self, s => s.runnable().await)
    }

    async fn prepare_environment(&self) -> RuntimeResult<()> {
        delegate!(self, s => s.prepare_environment().await)
    }

    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle> {
        delegate!(self, s => s.launch(spec).await)
    }

    async fn terminate(
        &self,
        service: &Service,
        handle: &BackendHandle,
        grace: Duration,
    ) -> RuntimeResult<()> {
        delegate!(self, s => s.terminate(service, handle, grace).await)
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        delegate!(self, s => s.probe_address(service).await)
    }
}

/// Probe order for a preference. Local always comes last.
pub fn candidates(preference: BackendPreference) -> Vec<BackendKind> {
    match preference {
        BackendPreference::Auto => vec![BackendKind::Kubernetes, BackendKind::Docker, BackendKind::Local],
        BackendPreference::Kubernetes => vec![BackendKind::Kubernetes, BackendKind::Local],
        BackendPreference::Docker => vec![BackendKind::Docker, BackendKind::Local],
        BackendPreference::Local => vec![BackendKind::Local],
    }
}

/// Pick the first runnable backend among the configured candidates.
pub async fn select(config: &FleetConfig) -> SelectedSubstrate {
    for kind in candidates(config.runtime.backend) {
        let substrate = SelectedSubstrate::build(kind, config);
        if let Err(e) = usable(&substrate).await {
            warn!(error = %e, "backend skipped");
            continue;
        }
        info!(backend = %kind, "backend selected");
        return substrate;
    }
    // Local is always a candidate and always runnable.
    SelectedSubstrate::Local(LocalSubstrate::new())
}

async fn usable(substrate: &SelectedSubstrate) -> RuntimeResult<()> {
    if !substrate.runnable().await {
        return Err(RuntimeError::BackendUnavailable {
            backend: substrate.kind().to_string(),
            reason: "self-test failed".to_string(),
        });
    }
    substrate
        .prepare_environment()
        .await
        .map_err(|e| RuntimeError::BackendUnavailable {
            backend: substrate.kind().to_string(),
            reason: e.to_string(),
        })
}

/// Self-test every backend, for `fleetd check`.
pub async fn report(config: &FleetConfig) -> Vec<(BackendKind, bool)> {
    let mut results = Vec::new();
    for kind in [BackendKind::Kubernetes, BackendKind::Docker, BackendKind::Local] {
        let runnable = SelectedSubstrate::build(kind, config).runnable().await;
        results.push((kind, runnable));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_is_always_the_fallback() {
        for pref in [
            BackendPreference::Auto,
            BackendPreference::Local,
            BackendPreference::Docker,
            BackendPreference::Kubernetes,
        ] {
            assert_eq!(candidates(pref).last(), Some(&BackendKind::Local));
        }
        assert_eq!(candidates(BackendPreference::Auto)[0], BackendKind::Kubernetes);
    }

    #[tokio::test]
    async fn forced_local_selects_local() {
        let mut config = FleetConfig::default();
        config.runtime.backend = BackendPreference::Local;
        assert_eq!(select(&config).await.kind(), BackendKind::Local);
    }

    #[tokio::test]
    async fn report_covers_every_backend() {
        let report = report(&FleetConfig::default()).await;
        assert_eq!(report.len(), 3);
        assert!(report.contains(&(BackendKind::Local, true)));
    }
}
