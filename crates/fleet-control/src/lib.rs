//! fleet-control — the operator interface.
//!
//! Wraps the registries and the selected runtime backend in the handful of
//! imperative operations an operator needs, translating internal error
//! kinds into rejection messages suitable for a terminal or a bot.

pub mod control;
pub mod error;

pub use control::{FleetControl, GroupUpdate};
pub use error::{ControlError, ControlResult};
