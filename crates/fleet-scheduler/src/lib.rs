//! fleet-scheduler — the reconciliation control loop.
//!
//! Every tick compares each group's `min_online` with the services the
//! registry holds for it and boots the difference through the active
//! runtime backend:
//!
//! ```text
//! Scheduler::tick
//!   └── for each group (skipping maintenance)
//!       ├── retry PREPARING services left by failed boots
//!       └── deficit = min(min_online, max_online) - count
//!           └── reserve → boot_application   (failures logged, loop continues)
//! ```
//!
//! Scale-down above `max_online` and restarts after a crash are left to the
//! operator.

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Scheduler, TickReport};
