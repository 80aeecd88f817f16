//! fleet-platform — resolves platform references to runnable artifacts.
//!
//! ```text
//! PlatformRef { name, version }
//!   └── Catalogue lookup → build id, URL, launch template
//!         └── PlatformResolver::prepare
//!               ├── cached?  → path
//!               └── per-reference lock → ArtifactFetcher → temp file
//!                     → checksum → atomic rename → path
//! ```

pub mod catalogue;
pub mod error;
pub mod fetcher;
pub mod resolver;

pub use catalogue::{Catalogue, Platform, PlatformKind, PlatformVersion};
pub use error::{PlatformError, PlatformResult};
pub use fetcher::{ArtifactFetcher, HttpFetcher};
pub use resolver::{PlatformResolver, ResolvedPlatform};
