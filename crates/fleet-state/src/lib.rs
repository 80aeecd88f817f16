//! fleet-state — group and service registries for Fleet.
//!
//! Groups are durable: they are persisted in [redb](https://docs.rs/redb)
//! and loaded at startup, with every create/update/destroy written through.
//! Services are live runtime state and exist only in memory.
//!
//! # Architecture
//!
//! ```text
//! GroupRegistry ── GroupStore (redb, JSON values keyed by group name)
//!      │
//!      └─ EventBus (broadcast) ─┐
//! ServiceRegistry ──────────────┘
//! ```
//!
//! Both registries are `Clone` + `Send` + `Sync` and can be shared across
//! the scheduler, the health detector and the operator interface.

pub mod error;
pub mod events;
pub mod groups;
pub mod services;
pub mod store;
pub mod tables;

pub use error::{RegistryError, RegistryResult, StateError, StateResult};
pub use events::{EventBus, FleetEvent};
pub use groups::GroupRegistry;
pub use services::ServiceRegistry;
pub use store::GroupStore;
