//! Test doubles for crates built on the runtime.
//!
//! [`FakeSubstrate`] "launches" a service by binding a TCP listener on its
//! port, so the health detector's probe sees it as reachable without any
//! real process. [`fixture`] wires it into a complete `Runtime` with an
//! in-memory group store and a fetcher that never touches the network.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{BackendHandle, Group, PlatformRef, Service};
use fleet_platform::{ArtifactFetcher, Catalogue, PlatformResolver, PlatformResult};
use fleet_state::{EventBus, GroupRegistry, GroupStore, RegistryError, ServiceRegistry};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{Runtime, RuntimeBackend};
use crate::substrate::{BackendKind, LaunchSpec, Substrate};

pub struct FakeSubstrate {
    listen_on_launch: bool,
    fail: AtomicBool,
    hold: AtomicBool,
    launch_reached: Notify,
    launch_released: Notify,
    probe_delay_ms: AtomicU64,
    next_pid: AtomicU32,
    listeners: Mutex<HashMap<String, TcpListener>>,
    launched: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
    last_command: Mutex<Option<Vec<String>>>,
}

impl FakeSubstrate {
    /// Units accept connections as soon as they are launched.
    pub fn new() -> Self {
        Self::with_listen(true)
    }

    /// Units stay unreachable until [`FakeSubstrate::open`] is called.
    pub fn silent() -> Self {
        Self::with_listen(false)
    }

    fn with_listen(listen_on_launch: bool) -> Self {
        Self {
            listen_on_launch,
            fail: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            launch_reached: Notify::new(),
            launch_released: Notify::new(),
            probe_delay_ms: AtomicU64::new(0),
            next_pid: AtomicU32::new(1000),
            listeners: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            last_command: Mutex::new(None),
        }
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Park every launch until [`FakeSubstrate::release_launch`].
    pub fn hold_launches(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Wait until a held launch is parked.
    pub async fn launch_parked(&self) {
        self.launch_reached.notified().await;
    }

    /// Let one parked launch finish.
    pub fn release_launch(&self) {
        self.launch_released.notify_one();
    }

    /// Delay every address lookup, widening the window between a health
    /// snapshot and its outcome.
    pub fn delay_probes(&self, delay: Duration) {
        self.probe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make a launched unit reachable.
    pub async fn open(&self, service: &Service) -> std::io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, service.port)).await?;
        self.listeners.lock().await.insert(service.name(), listener);
        Ok(())
    }

    pub async fn launched(&self) -> Vec<String> {
        self.launched.lock().await.clone()
    }

    pub async fn terminated(&self) -> Vec<String> {
        self.terminated.lock().await.clone()
    }

    pub async fn last_command(&self) -> Option<Vec<String>> {
        self.last_command.lock().await.clone()
    }
}

impl Default for FakeSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Substrate for FakeSubstrate {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn runnable(&self) -> bool {
        true
    }

    async fn launch(&self, spec: &LaunchSpec) -> RuntimeResult<BackendHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RuntimeError::Launch {
                service: spec.service.clone(),
                reason: "launch failure injected".to_string(),
            });
        }
        if self.hold.load(Ordering::SeqCst) {
            self.launch_reached.notify_one();
            self.launch_released.notified().await;
        }
        if self.listen_on_launch {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, spec.port)).await?;
            self.listeners
                .lock()
                .await
                .insert(spec.service.clone(), listener);
        }
        self.launched.lock().await.push(spec.service.clone());
        *self.last_command.lock().await = Some(spec.command.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(BackendHandle::Process { pid })
    }

    async fn terminate(
        &self,
        service: &Service,
        _handle: &BackendHandle,
        _grace: Duration,
    ) -> RuntimeResult<()> {
        self.listeners.lock().await.remove(&service.name());
        self.terminated.lock().await.push(service.name());
        Ok(())
    }

    async fn probe_address(&self, service: &Service) -> Option<SocketAddr> {
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Some(SocketAddr::from((Ipv4Addr::LOCALHOST, service.port)))
    }
}

/// Writes a fixed payload for any URL.
pub struct StaticFetcher;

#[async_trait]
impl ArtifactFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> PlatformResult<u64> {
        let payload = b"fleet test artifact";
        tokio::fs::write(dest, payload).await?;
        Ok(payload.len() as u64)
    }
}

/// A runtime over `substrate` rooted in a temporary directory.
pub struct Fixture<S: Substrate> {
    pub runtime: Arc<Runtime<S>>,
    pub events: EventBus,
    pub dir: tempfile::TempDir,
}

impl<S: Substrate> Fixture<S> {
    /// Create a `paper:1.21` group.
    pub async fn group(&self, name: &str, min: u32, max: u32) -> RuntimeResult<Group> {
        let group = Group::new(name, min, max, PlatformRef::new("paper", "1.21"));
        Ok(self.runtime.group_storage().create(group).await?)
    }
}

pub async fn fixture<S: Substrate>(substrate: S, port_start: u16) -> RuntimeResult<Fixture<S>> {
    let dir = tempfile::tempdir()?;
    let events = EventBus::default();
    let store = GroupStore::open_in_memory().map_err(RegistryError::from)?;
    let groups = GroupRegistry::load(store, events.clone())?;
    let services = ServiceRegistry::new(events.clone(), dir.path().join("temp"), port_start);
    let platforms = PlatformResolver::new(
        dir.path().join("platforms"),
        Catalogue::builtin()?,
        Arc::new(StaticFetcher),
    );
    let runtime = Runtime::new(
        substrate,
        groups,
        services,
        Arc::new(platforms),
        Duration::from_secs(1),
    );
    Ok(Fixture {
        runtime: Arc::new(runtime),
        events,
        dir,
    })
}
