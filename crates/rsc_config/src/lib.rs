//! Configuration for the script compiler driver.
//!
//! Settings come from an optional TOML file and are then overlaid with
//! environment variables, producing a strongly-typed [`DriverConfig`] that
//! controls cache bypass, lock retry behaviour, and compiler overrides.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, ENV_FORCE_RECOMPILE, ENV_PRECISION};
pub use types::*;
