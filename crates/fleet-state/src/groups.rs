//! Group registry — durable group definitions with snapshot reads.
//!
//! Reads clone out of an in-memory map and never wait on a writer for
//! longer than the copy. Writes are serialized by a single writer mutex
//! and go through the redb store before the in-memory view changes.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use fleet_core::Group;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::events::{EventBus, FleetEvent};
use crate::store::GroupStore;

struct GroupEntry {
    group: Group,
    /// Set while `destroy` stops the group's services.
    draining: bool,
}

struct Inner {
    store: GroupStore,
    groups: RwLock<BTreeMap<String, GroupEntry>>,
    writer: Mutex<()>,
    events: EventBus,
}

/// Cheaply cloneable handle to the group registry.
#[derive(Clone)]
pub struct GroupRegistry {
    inner: Arc<Inner>,
}

impl GroupRegistry {
    /// Load every persisted group from `store`.
    pub fn load(store: GroupStore, events: EventBus) -> RegistryResult<Self> {
        let groups = store
            .list_groups()?
            .into_iter()
            .map(|group| {
                (
                    group.name.clone(),
                    GroupEntry {
                        group,
                        draining: false,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        info!(count = groups.len(), "groups loaded");
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                groups: RwLock::new(groups),
                writer: Mutex::new(()),
                events,
            }),
        })
    }

    /// Snapshot of every live group. Groups being destroyed are excluded.
    pub async fn list(&self) -> Vec<Group> {
        let groups = self.inner.groups.read().await;
        groups
            .values()
            .filter(|e| !e.draining)
            .map(|e| e.group.clone())
            .collect()
    }

    pub async fn find(&self, name: &str) -> Option<Group> {
        let groups = self.inner.groups.read().await;
        groups
            .get(name)
            .filter(|e| !e.draining)
            .map(|e| e.group.clone())
    }

    pub async fn create(&self, group: Group) -> RegistryResult<Group> {
        group.validate()?;
        let _writer = self.inner.writer.lock().await;

        if self.inner.groups.read().await.contains_key(&group.name) {
            return Err(RegistryError::DuplicateGroup(group.name));
        }
        self.inner.store.put_group(&group)?;
        self.inner.groups.write().await.insert(
            group.name.clone(),
            GroupEntry {
                group: group.clone(),
                draining: false,
            },
        );

        info!(group = %group.name, min = group.min_online, max = group.max_online, platform = %group.platform, "group created");
        self.inner.events.publish(FleetEvent::GroupCreated(group.clone()));
        Ok(group)
    }

    /// Replace an existing group's definition (matched by name).
    pub async fn update(&self, group: Group) -> RegistryResult<Group> {
        group.validate()?;
        let _writer = self.inner.writer.lock().await;

        let exists = self
            .inner
            .groups
            .read()
            .await
            .get(&group.name)
            .is_some_and(|e| !e.draining);
        if !exists {
            return Err(RegistryError::GroupNotFound(group.name));
        }
        self.inner.store.put_group(&group)?;
        if let Some(entry) = self.inner.groups.write().await.get_mut(&group.name) {
            entry.group = group.clone();
        }

        debug!(group = %group.name, "group updated");
        self.inner.events.publish(FleetEvent::GroupUpdated(group.clone()));
        Ok(group)
    }

    /// Destroy a group.
    ///
    /// The group is first hidden from `list`/`find` so the scheduler stops
    /// creating services for it, then `drain` runs to stop the services it
    /// owns, and only afterwards is the definition removed from storage.
    pub async fn destroy<F, Fut>(&self, name: &str, drain: F) -> RegistryResult<Group>
    where
        F: FnOnce(Group) -> Fut,
        Fut: Future<Output = ()>,
    {
        let _writer = self.inner.writer.lock().await;

        let group = {
            let mut groups = self.inner.groups.write().await;
            match groups.get_mut(name) {
                Some(entry) if !entry.draining => {
                    entry.draining = true;
                    entry.group.clone()
                }
                _ => return Err(RegistryError::GroupNotFound(name.to_string())),
            }
        };

        debug!(group = %name, "draining group services");
        drain(group.clone()).await;

        if let Err(e) = self.inner.store.delete_group(name) {
            if let Some(entry) = self.inner.groups.write().await.get_mut(name) {
                entry.draining = false;
            }
            return Err(e.into());
        }
        self.inner.groups.write().await.remove(name);

        info!(group = %name, "group destroyed");
        self.inner
            .events
            .publish(FleetEvent::GroupDestroyed(name.to_string()));
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::PlatformRef;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn registry() -> GroupRegistry {
        GroupRegistry::load(GroupStore::open_in_memory().unwrap(), EventBus::default()).unwrap()
    }

    fn lobby() -> Group {
        Group::new("lobby", 2, 5, PlatformRef::new("paper", "1.21"))
    }

    #[tokio::test]
    async fn create_and_find() {
        let groups = registry();
        groups.create(lobby()).await.unwrap();

        assert_eq!(groups.find("lobby").await, Some(lobby()));
        assert_eq!(groups.list().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let groups = registry();
        groups.create(lobby()).await.unwrap();

        let err = groups.create(lobby()).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateGroup(name) if name == "lobby"));
    }

    #[tokio::test]
    async fn invalid_capacity_is_rejected_on_create_and_update() {
        let groups = registry();
        let mut bad = lobby();
        bad.min_online = 9;
        assert!(matches!(
            groups.create(bad.clone()).await,
            Err(RegistryError::InvalidGroup(_))
        ));

        groups.create(lobby()).await.unwrap();
        assert!(matches!(
            groups.update(bad).await,
            Err(RegistryError::InvalidGroup(_))
        ));
        assert_eq!(groups.find("lobby").await.unwrap().min_online, 2);
    }

    #[tokio::test]
    async fn update_missing_group_fails() {
        let groups = registry();
        assert!(matches!(
            groups.update(lobby()).await,
            Err(RegistryError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_writes_through() {
        let store = GroupStore::open_in_memory().unwrap();
        let groups = GroupRegistry::load(store.clone(), EventBus::default()).unwrap();
        groups.create(lobby()).await.unwrap();

        let mut changed = lobby();
        changed.max_online = 8;
        groups.update(changed).await.unwrap();

        assert_eq!(store.get_group("lobby").unwrap().unwrap().max_online, 8);
    }

    #[tokio::test]
    async fn destroy_runs_drain_before_removal() {
        let store = GroupStore::open_in_memory().unwrap();
        let groups = GroupRegistry::load(store.clone(), EventBus::default()).unwrap();
        groups.create(lobby()).await.unwrap();

        let drained = Arc::new(AtomicBool::new(false));
        let flag = drained.clone();
        let view = groups.clone();
        let persisted = store.clone();
        groups
            .destroy("lobby", |group| async move {
                assert_eq!(group.name, "lobby");
                // Hidden from snapshots, still persisted while draining.
                assert!(view.find("lobby").await.is_none());
                assert!(persisted.get_group("lobby").unwrap().is_some());
                flag.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(drained.load(Ordering::SeqCst));
        assert!(store.get_group("lobby").unwrap().is_none());
        assert!(groups.list().await.is_empty());
    }

    #[tokio::test]
    async fn destroy_missing_group_fails() {
        let groups = registry();
        let result = groups.destroy("nope", |_| async {}).await;
        assert!(matches!(result, Err(RegistryError::GroupNotFound(_))));
    }

    #[tokio::test]
    async fn load_restores_persisted_groups() {
        let store = GroupStore::open_in_memory().unwrap();
        store.put_group(&lobby()).unwrap();

        let groups = GroupRegistry::load(store, EventBus::default()).unwrap();
        assert_eq!(groups.find("lobby").await, Some(lobby()));
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let groups = GroupRegistry::load(GroupStore::open_in_memory().unwrap(), bus).unwrap();

        groups.create(lobby()).await.unwrap();
        groups.destroy("lobby", |_| async {}).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), FleetEvent::GroupCreated(lobby()));
        assert_eq!(
            rx.recv().await.unwrap(),
            FleetEvent::GroupDestroyed("lobby".to_string())
        );
    }
}
