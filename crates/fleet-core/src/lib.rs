pub mod config;
pub mod types;

pub use config::{BackendPreference, FleetConfig, parse_duration};
pub use types::*;
