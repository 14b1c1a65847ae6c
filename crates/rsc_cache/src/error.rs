//! Error types for cache operations.

use std::path::PathBuf;

use crate::lock::LockError;

/// Errors that can occur during cache operations.
///
/// Only the write path surfaces these: lookups are fail-safe and turn every
/// problem into a cache miss. A failed insertion never fails a build, the
/// caller still holds the compiled bytes.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The resource name cannot be used as a cache file name.
    #[error("invalid resource name '{name}': {reason}")]
    InvalidResourceName {
        /// The rejected resource name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A cache lock could not be acquired.
    #[error("unable to lock {path}: {source}")]
    Lock {
        /// The lock file or artifact that could not be locked.
        path: PathBuf,
        /// The underlying lock failure.
        source: LockError,
    },

    /// A serialization error occurred while encoding an info file.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/data/cache/blur.o"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("blur.o"));
    }

    #[test]
    fn invalid_resource_name_display() {
        let err = CacheError::InvalidResourceName {
            name: "../etc".to_string(),
            reason: "contains a path separator".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'../etc'"));
        assert!(msg.contains("path separator"));
    }

    #[test]
    fn lock_error_display() {
        let err = CacheError::Lock {
            path: PathBuf::from("blur.o.lock"),
            source: LockError::Timeout { attempts: 4 },
        };
        let msg = err.to_string();
        assert!(msg.contains("unable to lock blur.o.lock"));
        assert!(msg.contains("4 attempts"));
    }

    #[test]
    fn serialization_error_display() {
        let err = CacheError::Serialization {
            reason: "sequence too long".to_string(),
        };
        assert!(err.to_string().contains("sequence too long"));
    }
}
