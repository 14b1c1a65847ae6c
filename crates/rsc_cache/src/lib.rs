//! Crash-safe, concurrency-safe compilation cache.
//!
//! Each cache slot holds one compiled artifact (`{dir}/{name}.o`) and an info
//! file (`{dir}/{name}.o.info`) recording the dependency table and compiler
//! configuration that produced it. Slots are shared between processes and
//! guarded by advisory file locks: lookups take shared locks, insertions take
//! an exclusive lock for the whole truncate-and-rewrite of both files. Any
//! problem on the read path (contention, missing files, corruption, stale
//! dependencies) is reported as a cache miss, never as a hard error.

#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod lock;
pub mod metadata;
pub mod store;

pub use error::CacheError;
pub use key::CacheKey;
pub use lock::{FileLock, LockError, LockMode, LockResult, RetryPolicy};
pub use metadata::{CacheMetadata, MetadataOutcome, StaleReason};
pub use store::{CacheStore, CachedArtifact, LookupOutcome, MissReason};
