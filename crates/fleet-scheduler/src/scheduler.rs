//! Scheduler — keeps every group at or above its minimum online count.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{Group, ServiceState};
use fleet_runtime::{RuntimeBackend, start_one};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SchedulerResult;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// New services reserved and booted.
    pub created: u32,
    /// PREPARING services from earlier ticks booted successfully.
    pub retried: u32,
    /// Boot attempts that failed this tick.
    pub failed: u32,
    /// Groups skipped for maintenance.
    pub skipped: u32,
}

/// The control loop. Only one instance should run per process, so ticks
/// for a group never overlap.
pub struct Scheduler<B: RuntimeBackend> {
    backend: Arc<B>,
}

impl<B: RuntimeBackend> Scheduler<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// One full reconciliation pass over all groups.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for group in self.backend.group_storage().list().await {
            if group.in_maintenance() {
                debug!(group = %group.name, "group in maintenance, skipped");
                report.skipped += 1;
                continue;
            }
            self.reconcile(&group, &mut report).await;
        }
        report
    }

    async fn reconcile(&self, group: &Group, report: &mut TickReport) {
        let services = self.backend.service_storage().find_by_group(&group.name).await;

        for service in services.iter().filter(|s| s.state == ServiceState::Preparing) {
            let name = service.name();
            match self.backend.boot_application(&name).await {
                Ok(()) => report.retried += 1,
                Err(e) => {
                    warn!(group = %group.name, service = %name, error = %e, "boot retry failed");
                    report.failed += 1;
                }
            }
        }

        let count = services.len() as u32;
        let wanted = group.min_online.min(group.max_online);
        let deficit = wanted.saturating_sub(count);
        if deficit == 0 {
            return;
        }

        info!(group = %group.name, count, min = group.min_online, deficit, "group under capacity");
        for _ in 0..deficit {
            match self.boot_new(group).await {
                Ok(name) => {
                    debug!(group = %group.name, service = %name, "service booted");
                    report.created += 1;
                }
                Err(e) => {
                    warn!(group = %group.name, error = %e, "service boot failed");
                    report.failed += 1;
                }
            }
        }
    }

    async fn boot_new(&self, group: &Group) -> SchedulerResult<String> {
        let service = start_one(self.backend.as_ref(), group).await?;
        Ok(service.name())
    }

    /// Tick every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report != TickReport::default() {
                        debug!(?report, "scheduler tick");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}
