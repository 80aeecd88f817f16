//! fleet-runtime — starts and stops services on a substrate.
//!
//! Exactly one backend is active per process. It is chosen at startup by
//! probing candidates in order, with local processes as the fallback that
//! always works:
//!
//! ```text
//! select(config)
//!   ├── KubernetesSubstrate  (in-cluster env + API reachable)
//!   ├── DockerSubstrate      (socket + `docker info`)
//!   └── LocalSubstrate       (always)
//!         │
//!         ▼
//! Runtime<SelectedSubstrate>: RuntimeBackend
//!   ├── boot_application      PREPARING → resolve → workdir → launch → STARTING
//!   └── shutdown_application  → STOPPING → terminate → cleanup → removed
//! ```

mod command;
pub mod docker;
pub mod error;
pub mod kubernetes;
pub mod local;
pub mod runtime;
pub mod select;
pub mod substrate;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{Runtime, RuntimeBackend, start_one};
pub use select::{SelectedSubstrate, candidates, report, select};
pub use substrate::{BackendKind, LaunchSpec, Substrate};
