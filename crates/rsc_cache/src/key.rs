//! Cache slot addressing.

use std::path::{Path, PathBuf};

use crate::error::CacheError;

/// Extension of a compiled artifact.
const ARTIFACT_EXT: &str = "o";

/// Suffix appended to the artifact path for its info file.
const INFO_SUFFIX: &str = ".info";

/// Suffix appended to the artifact path for its lock file.
const LOCK_SUFFIX: &str = ".lock";

/// The file paths of one cache slot, derived from `(cache_dir, resource_name)`.
///
/// The mapping is pure, so every process building the same resource in the
/// same directory addresses the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    cache_dir: PathBuf,
    resource_name: String,
    artifact_path: PathBuf,
    info_path: PathBuf,
    lock_path: PathBuf,
}

impl CacheKey {
    /// Derives the slot for `resource_name` inside `cache_dir`.
    ///
    /// The name becomes a single file name component, so it must be non-empty
    /// and must not contain path separators, NUL, or be `.`/`..`.
    pub fn new(cache_dir: &Path, resource_name: &str) -> Result<Self, CacheError> {
        validate_resource_name(resource_name)?;

        let artifact_path = cache_dir.join(format!("{resource_name}.{ARTIFACT_EXT}"));
        let info_path = with_suffix(&artifact_path, INFO_SUFFIX);
        let lock_path = with_suffix(&artifact_path, LOCK_SUFFIX);

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            resource_name: resource_name.to_string(),
            artifact_path,
            info_path,
            lock_path,
        })
    }

    /// The directory holding the slot.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The resource name the slot was derived from.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// `{cache_dir}/{resource_name}.o`
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// `{cache_dir}/{resource_name}.o.info`
    pub fn info_path(&self) -> &Path {
        &self.info_path
    }

    /// `{cache_dir}/{resource_name}.o.lock`, the per-slot mutex file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn validate_resource_name(name: &str) -> Result<(), CacheError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative directory reference")
    } else if name.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(CacheError::InvalidResourceName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
