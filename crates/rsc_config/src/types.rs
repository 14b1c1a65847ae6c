//! Configuration types deserialized from the driver's TOML file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// The top-level driver configuration.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DriverConfig {
    /// Compilation cache settings.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Cross-process lock retry settings.
    #[serde(default)]
    pub lock: LockSettings,
    /// Compiler overrides applied on top of what the bitcode requests.
    #[serde(default)]
    pub compiler: CompilerSettings,
}

/// Settings for the on-disk compilation cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// Bypass every cache lookup and always recompile.
    #[serde(default)]
    pub force_recompile: bool,
}

/// Bounded retry settings for acquiring cache file locks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockSettings {
    /// Total number of lock attempts before giving up (at least 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Sleep after the first failed attempt, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling backoff, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_backoff_ms() -> u64 {
    5
}

fn default_max_backoff_ms() -> u64 {
    200
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl LockSettings {
    /// Returns the initial backoff as a [`Duration`].
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Returns the backoff cap as a [`Duration`].
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Compiler overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompilerSettings {
    /// Optimization level (0-3) that replaces the one recorded in the bitcode.
    #[serde(default)]
    pub optimization_level: Option<u8>,
    /// Floating-point precision that replaces the script's default.
    #[serde(default)]
    pub precision: Option<FloatPrecision>,
}

/// Floating-point precision a compiled script must honour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatPrecision {
    /// Full IEEE 754 precision (default).
    #[default]
    Full,
    /// Relaxed precision: flush-to-zero and vector units allowed.
    Relaxed,
    /// Imprecise: relaxed plus reduced-precision math routines.
    Imprecise,
}

impl FromStr for FloatPrecision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "relaxed" => Ok(Self::Relaxed),
            "imprecise" => Ok(Self::Imprecise),
            _ => Err(ConfigError::InvalidValue {
                key: "precision".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FloatPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Relaxed => "relaxed",
            Self::Imprecise => "imprecise",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_defaults() {
        let lock = LockSettings::default();
        assert_eq!(lock.max_attempts, 8);
        assert_eq!(lock.initial_backoff(), Duration::from_millis(5));
        assert_eq!(lock.max_backoff(), Duration::from_millis(200));
    }

    #[test]
    fn precision_from_str() {
        assert_eq!("full".parse::<FloatPrecision>().unwrap(), FloatPrecision::Full);
        assert_eq!(
            " Relaxed ".parse::<FloatPrecision>().unwrap(),
            FloatPrecision::Relaxed
        );
        assert_eq!(
            "IMPRECISE".parse::<FloatPrecision>().unwrap(),
            FloatPrecision::Imprecise
        );
        assert!(matches!(
            "double".parse::<FloatPrecision>(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn precision_display() {
        assert_eq!(FloatPrecision::Relaxed.to_string(), "relaxed");
        assert_eq!(FloatPrecision::default(), FloatPrecision::Full);
    }
}
