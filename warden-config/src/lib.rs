//! Configuration for the Warden auth core.
//!
//! Reads a TOML file, layers `.env` and process environment overrides for
//! secrets on top, converts human-readable durations, and runs guard rails
//! before handing back an [`AuthPolicy`](warden_core::AuthPolicy) plus the
//! key material the core needs.

pub mod constants;
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, EnvSource, error::ConfigLoadError};
pub use models::{Config, ConfigMetadata, SecretsConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, apply_guard_rails};
