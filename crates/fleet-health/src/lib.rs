//! fleet-health — reachability detection for starting services.
//!
//! The detector runs on its own tick, independent of the scheduler. Each
//! tick probes every STARTING service with a plain TCP connect to the
//! address its backend reports; a successful connect promotes the service
//! to ONLINE through the service registry, which publishes the change.
//!
//! ```text
//! HealthDetector::tick
//!   └── for each STARTING service (probed concurrently)
//!       ├── backend.probe_address()
//!       ├── tcp_probe(addr, timeout) → ProbeResult
//!       └── Reachable → set_state(ONLINE)
//! ```
//!
//! A refused or timed-out probe is the normal signal of a server that is
//! still booting. It is logged at debug and retried next tick, with no
//! upper bound on attempts.

pub mod checker;
pub mod detector;

pub use checker::{ProbeResult, tcp_probe};
pub use detector::{DetectorReport, HealthDetector};
