//! Configuration for edgeship deployments.
//!
//! Values are layered: built-in defaults, then `edgeship.toml`, then
//! `EDGESHIP_*` variables from the process environment or a `.env` file.
//! The composed [`Config`] passes through guard rails before it is handed
//! to the engine; problems that do not block a run come back as
//! [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod telemetry;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LoggingConfig};
pub use telemetry::init_tracing;
pub use validation::{
    ConfigGuardRailError, ConfigWarning, ConfigWarnings, apply_guard_rails,
};
