//! Configuration file loading, environment overlay, and validation.

use crate::error::ConfigError;
use crate::types::{DriverConfig, FloatPrecision};
use std::path::Path;
use tracing::debug;

/// Environment variable that forces every build to recompile when set to
/// `1` or `true`.
pub const ENV_FORCE_RECOMPILE: &str = "RSC_FORCE_RECOMPILE";

/// Environment variable that overrides floating-point precision. Any
/// non-empty value also forces recompilation.
pub const ENV_PRECISION: &str = "RSC_PRECISION";

/// Highest optimization level accepted by the compiler.
const MAX_OPT_LEVEL: u8 = 3;

/// Loads and validates a driver configuration file.
pub fn load_config(path: &Path) -> Result<DriverConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "loaded driver configuration");
    load_config_from_str(&content)
}

/// Parses and validates a driver configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<DriverConfig, ConfigError> {
    let config: DriverConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl DriverConfig {
    /// Returns the default configuration overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays environment settings obtained through `lookup`.
    ///
    /// `RSC_FORCE_RECOMPILE` accepts `1` or `true` (any other value leaves the
    /// flag untouched). A non-empty `RSC_PRECISION` sets the precision and
    /// forces recompilation, since cached builds may have been produced under
    /// a different precision.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FORCE_RECOMPILE) {
            if matches!(value.trim(), "1" | "true") {
                debug!("{ENV_FORCE_RECOMPILE} set, cache lookups bypassed");
                self.cache.force_recompile = true;
            }
        }

        if let Some(value) = lookup(ENV_PRECISION) {
            if !value.is_empty() {
                let precision =
                    value
                        .parse::<FloatPrecision>()
                        .map_err(|_| ConfigError::InvalidValue {
                            key: ENV_PRECISION.to_string(),
                            value: value.clone(),
                        })?;
                debug!(%precision, "{ENV_PRECISION} override, cache lookups bypassed");
                self.compiler.precision = Some(precision);
                self.cache.force_recompile = true;
            }
        }

        Ok(())
    }

    /// Checks that the configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "lock.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock.initial_backoff_ms > self.lock.max_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "lock.initial_backoff_ms ({}) exceeds lock.max_backoff_ms ({})",
                self.lock.initial_backoff_ms, self.lock.max_backoff_ms
            )));
        }
        if let Some(level) = self.compiler.optimization_level {
            if level > MAX_OPT_LEVEL {
                return Err(ConfigError::ValidationError(format!(
                    "compiler.optimization_level must be 0-{MAX_OPT_LEVEL}, got {level}"
                )));
            }
        }
        Ok(())
    }
}
