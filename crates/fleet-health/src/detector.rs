//! Health detector — background loop promoting STARTING services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::ServiceState;
use fleet_runtime::RuntimeBackend;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::checker::{ProbeResult, tcp_probe};

/// What one tick observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorReport {
    pub promoted: u32,
    pub pending: u32,
}

pub struct HealthDetector<B: RuntimeBackend> {
    backend: Arc<B>,
    probe_timeout: Duration,
    /// Consecutive misses per STARTING service, for logging only.
    misses: Mutex<HashMap<String, u32>>,
}

impl<B: RuntimeBackend> HealthDetector<B> {
    pub fn new(backend: Arc<B>, probe_timeout: Duration) -> Self {
        Self {
            backend,
            probe_timeout,
            misses: Mutex::new(HashMap::new()),
        }
    }

    /// Probe every STARTING service once.
    pub async fn tick(&self) -> DetectorReport {
        let starting = self
            .backend
            .service_storage()
            .in_state(ServiceState::Starting)
            .await;

        let mut probes = JoinSet::new();
        for service in starting {
            let backend = self.backend.clone();
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let result = match backend.probe_address(&service).await {
                    Some(addr) => tcp_probe(addr, timeout).await,
                    None => ProbeResult::Refused,
                };
                (service, result)
            });
        }

        let mut report = DetectorReport::default();
        let mut misses = self.misses.lock().await;
        while let Some(joined) = probes.join_next().await {
            let (service, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "probe task failed");
                    continue;
                }
            };

            let name = service.name();
            if !result.is_reachable() {
                let count = misses.entry(name.clone()).or_insert(0);
                *count += 1;
                debug!(service = %name, ?result, attempts = *count, "service not reachable yet");
                report.pending += 1;
                continue;
            }

            misses.remove(&name);
            match self
                .backend
                .service_storage()
                .set_state_of(&service, ServiceState::Online)
                .await
            {
                Ok(_) => {
                    info!(service = %name, "service online");
                    report.promoted += 1;
                }
                // Shut down or replaced between snapshot and promotion.
                Err(e) => debug!(service = %name, error = %e, "promotion skipped"),
            }
        }

        // Forget services that left STARTING some other way.
        let still_starting: Vec<String> = self
            .backend
            .service_storage()
            .in_state(ServiceState::Starting)
            .await
            .iter()
            .map(|s| s.name())
            .collect();
        misses.retain(|name, _| still_starting.contains(name));

        report
    }

    /// Tick every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, timeout = ?self.probe_timeout, "health detector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    debug!("health detector shutting down");
                    break;
                }
            }
        }
    }
}
