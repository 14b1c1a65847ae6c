//! Cache lookup and insertion for a single slot.
//!
//! `CacheStore` ties together the slot paths, the file locks, and the info
//! file into the two operations the compiler driver needs. Every lookup goes
//! to disk; nothing is cached in memory between calls, so concurrent processes
//! always observe each other's insertions.
//!
//! Locking protocol per slot:
//!
//! - lookup: shared lock on `{name}.o.lock`, then a shared lock on the open
//!   artifact while its info file and bytes are read.
//! - insert: exclusive lock on `{name}.o.lock`, then an exclusive lock on the
//!   open artifact while the old info file is removed, the artifact is
//!   truncated and rewritten, and the new info file is written.
//!
//! Compilation happens between the two, outside any lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use rsc_common::DependencyTable;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::lock::{FileLock, LockMode, RetryPolicy};
use crate::metadata::{CacheMetadata, MetadataOutcome, StaleReason};

/// A validated cache hit.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    /// Path of the artifact on disk.
    pub path: PathBuf,
    /// The artifact bytes, read while the slot was locked.
    pub bytes: Vec<u8>,
    /// The validated metadata.
    pub metadata: CacheMetadata,
}

/// Why a lookup did not produce a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// Lookups are disabled by the force-recompile switch.
    Bypassed,
    /// A lock could not be acquired within the retry budget.
    LockUnavailable(String),
    /// No artifact exists in the slot.
    ArtifactMissing,
    /// The artifact exists but has no info file.
    MetadataMissing,
    /// The info file is malformed or unreadable.
    MetadataCorrupt(String),
    /// The info file describes a different build.
    Stale(StaleReason),
    /// The artifact bytes do not match the checksum in the info file.
    ArtifactCorrupt,
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// A valid artifact was found.
    Hit(CachedArtifact),
    /// Nothing usable was found; the caller must compile.
    Miss(MissReason),
}

impl LookupOutcome {
    /// Returns `true` for a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns the hit, if any.
    pub fn into_hit(self) -> Option<CachedArtifact> {
        match self {
            Self::Hit(artifact) => Some(artifact),
            Self::Miss(_) => None,
        }
    }

    /// Returns the miss reason, if any.
    pub fn miss_reason(&self) -> Option<&MissReason> {
        match self {
            Self::Hit(_) => None,
            Self::Miss(reason) => Some(reason),
        }
    }
}

/// Reads and writes cache slots under cross-process locks.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    policy: RetryPolicy,
    force_recompile: bool,
}

impl CacheStore {
    /// Creates a store that retries lock acquisition according to `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            force_recompile: false,
        }
    }

    /// Makes every lookup report [`MissReason::Bypassed`].
    pub fn with_force_recompile(mut self, force: bool) -> Self {
        self.force_recompile = force;
        self
    }

    /// Returns the lock retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns `true` if lookups are bypassed.
    pub fn force_recompile(&self) -> bool {
        self.force_recompile
    }

    /// Looks up the artifact for `key`, validating it against the live
    /// dependency table and compiler configuration signature.
    pub fn lookup(
        &self,
        key: &CacheKey,
        expected_deps: &DependencyTable,
        expected_signature: &[u8],
    ) -> LookupOutcome {
        let start = Instant::now();
        let outcome = self.lookup_inner(key, expected_deps, expected_signature);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            LookupOutcome::Hit(_) => {
                debug!(path = %key.artifact_path().display(), elapsed_ms, "cache hit");
            }
            LookupOutcome::Miss(reason) => {
                debug!(path = %key.artifact_path().display(), ?reason, elapsed_ms, "cache miss");
            }
        }
        outcome
    }

    fn lookup_inner(
        &self,
        key: &CacheKey,
        expected_deps: &DependencyTable,
        expected_signature: &[u8],
    ) -> LookupOutcome {
        if self.force_recompile {
            return LookupOutcome::Miss(MissReason::Bypassed);
        }

        if !key.artifact_path().exists() {
            return LookupOutcome::Miss(MissReason::ArtifactMissing);
        }

        let _slot_lock = match FileLock::acquire(key.lock_path(), LockMode::Shared, &self.policy)
        {
            Ok(lock) => lock,
            Err(e) => {
                warn!(path = %key.lock_path().display(), error = %e, "unable to acquire read lock");
                return LookupOutcome::Miss(MissReason::LockUnavailable(e.to_string()));
            }
        };

        let file = match File::open(key.artifact_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return LookupOutcome::Miss(MissReason::ArtifactMissing);
            }
            Err(e) => {
                warn!(path = %key.artifact_path().display(), error = %e, "unable to open artifact");
                return LookupOutcome::Miss(MissReason::ArtifactMissing);
            }
        };

        let artifact_lock =
            match FileLock::lock_file(file, key.artifact_path(), LockMode::Shared, &self.policy) {
                Ok(lock) => lock,
                Err(e) => {
                    warn!(
                        path = %key.artifact_path().display(),
                        info = %key.info_path().display(),
                        error = %e,
                        "unable to lock artifact for reading its info file"
                    );
                    return LookupOutcome::Miss(MissReason::LockUnavailable(e.to_string()));
                }
            };

        let metadata = match CacheMetadata::read_from_file(
            key.info_path(),
            expected_deps,
            expected_signature,
        ) {
            MetadataOutcome::Valid(metadata) => metadata,
            MetadataOutcome::Missing => return LookupOutcome::Miss(MissReason::MetadataMissing),
            MetadataOutcome::Corrupt(reason) => {
                return LookupOutcome::Miss(MissReason::MetadataCorrupt(reason));
            }
            MetadataOutcome::Stale(reason) => return LookupOutcome::Miss(MissReason::Stale(reason)),
        };

        let mut bytes = Vec::new();
        let mut reader = artifact_lock.file();
        if let Err(e) = reader.read_to_end(&mut bytes) {
            warn!(path = %key.artifact_path().display(), error = %e, "unable to read artifact");
            return LookupOutcome::Miss(MissReason::ArtifactCorrupt);
        }

        if !metadata.matches_artifact(&bytes) {
            return LookupOutcome::Miss(MissReason::ArtifactCorrupt);
        }

        LookupOutcome::Hit(CachedArtifact {
            path: key.artifact_path().to_path_buf(),
            bytes,
            metadata,
        })
    }

    /// Replaces the slot's artifact and info file.
    ///
    /// Both files are rewritten in full while the slot is exclusively locked.
    /// The old info file is removed before the artifact is touched, so a crash
    /// at any point leaves either no info file or one matching the artifact.
    pub fn insert(
        &self,
        key: &CacheKey,
        artifact: &[u8],
        metadata: &CacheMetadata,
    ) -> Result<(), CacheError> {
        let start = Instant::now();

        std::fs::create_dir_all(key.cache_dir()).map_err(|e| CacheError::Io {
            path: key.cache_dir().to_path_buf(),
            source: e,
        })?;

        let _slot_lock = FileLock::acquire(key.lock_path(), LockMode::Exclusive, &self.policy)
            .map_err(|e| CacheError::Lock {
                path: key.lock_path().to_path_buf(),
                source: e,
            })?;

        // Truncation must wait for the artifact lock below.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(key.artifact_path())
            .map_err(|e| CacheError::Io {
                path: key.artifact_path().to_path_buf(),
                source: e,
            })?;

        let artifact_lock =
            FileLock::lock_file(file, key.artifact_path(), LockMode::Exclusive, &self.policy)
                .map_err(|e| CacheError::Lock {
                    path: key.artifact_path().to_path_buf(),
                    source: e,
                })?;

        match std::fs::remove_file(key.info_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Io {
                    path: key.info_path().to_path_buf(),
                    source: e,
                });
            }
        }

        write_artifact(artifact_lock.file(), artifact).map_err(|e| CacheError::Io {
            path: key.artifact_path().to_path_buf(),
            source: e,
        })?;

        metadata.write_to_file(key.info_path())?;

        info!(
            path = %key.artifact_path().display(),
            bytes = artifact.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "cached compiled artifact"
        );
        Ok(())
    }
}

fn write_artifact(mut file: &File, artifact: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.write_all(artifact)?;
    file.sync_data()
}
