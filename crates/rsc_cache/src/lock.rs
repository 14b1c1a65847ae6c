//! Cross-process advisory file locks with bounded retry.
//!
//! Locks are `flock(2)` locks, so they only coordinate cooperating callers:
//! every cache reader and writer goes through this module. Acquisition never
//! blocks indefinitely. A lock that stays held past the retry budget yields
//! [`LockError::Timeout`], which the cache turns into a miss (lookups) or a
//! skipped persist (insertions).
//!
//! The lock is released when the [`FileLock`] is dropped, so every exit path
//! of the caller, including `?` returns and unwinding, gives it up.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed held by another holder for the whole retry budget.
    #[error("lock still held after {attempts} attempts")]
    Timeout {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The lock file could not be opened or the lock call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared (read) lock: excludes only exclusive holders.
    Shared,
    /// Exclusive (write) lock: excludes every other holder.
    Exclusive,
}

/// Bounded retry schedule for lock acquisition.
///
/// After each failed attempt the caller sleeps, starting at
/// `initial_backoff` and doubling up to `max_backoff`. No sleep follows the
/// last attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (values below 1 are treated as 1).
    pub max_attempts: u32,
    /// Sleep after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Sleep after failed attempt number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Upper bound on the total time spent sleeping across all attempts.
    pub fn max_wait(&self) -> Duration {
        (0..self.attempts().saturating_sub(1))
            .map(|attempt| self.backoff(attempt))
            .sum()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A held advisory lock on a file.
///
/// The lock is automatically released when this struct is dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
    mode: LockMode,
    held: bool,
}

impl FileLock {
    /// Opens (creating if needed) the lock file at `path` and locks it.
    ///
    /// The file's contents are never touched, it only serves as a mutex. An
    /// existing lock file this process may not write is opened read-only.
    pub fn acquire(path: &Path, mode: LockMode, policy: &RetryPolicy) -> LockResult<Self> {
        let file = match OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
        {
            Ok(file) => file,
            // flock only needs a readable descriptor.
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(path)?,
            Err(e) => return Err(LockError::Io(e)),
        };
        Self::lock_file(file, path, mode, policy)
    }

    /// Locks an already-open file, taking ownership of the handle.
    ///
    /// Used for the artifact itself, so the locked handle is the one that is
    /// read or rewritten. On failure the handle is closed.
    pub fn lock_file(
        file: File,
        path: &Path,
        mode: LockMode,
        policy: &RetryPolicy,
    ) -> LockResult<Self> {
        let start = Instant::now();
        let attempts = policy.attempts();
        let mut warned = false;

        for attempt in 0..attempts {
            match sys::try_lock(&file, mode) {
                Ok(()) => {
                    if warned {
                        debug!(
                            path = %path.display(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        file,
                        mode,
                        held: true,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned {
                        warn!(path = %path.display(), ?mode, "lock contention, retrying");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if attempt + 1 < attempts {
                std::thread::sleep(policy.backoff(attempt));
            }
        }

        Err(LockError::Timeout { attempts })
    }

    /// Releases the lock. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.held {
            sys::unlock(&self.file);
            self.held = false;
        }
    }

    /// Returns `true` until [`release`](Self::release) is called.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// The locked file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The locked file handle.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    use super::LockMode;

    pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        } | libc::LOCK_NB;

        loop {
            let result = unsafe { libc::flock(file.as_raw_fd(), op) };
            if result == 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(code) if code == libc::EWOULDBLOCK => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"));
                }
                _ => return Err(err),
            }
        }
    }

    pub fn unlock(file: &File) {
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    use super::LockMode;

    pub fn try_lock(_file: &File, _mode: LockMode) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory file locks are only available on unix",
        ))
    }

    pub fn unlock(_file: &File) {}
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn acquire_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        let lock = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        assert!(path.exists());
        assert!(lock.is_held());
        assert_eq!(lock.path(), path);
        assert_eq!(lock.mode(), LockMode::Exclusive);
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        let _a = FileLock::acquire(&path, LockMode::Shared, &fast_policy(1)).unwrap();
        let _b = FileLock::acquire(&path, LockMode::Shared, &fast_policy(1)).unwrap();
    }

    #[test]
    fn exclusive_excludes_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        let _writer = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        let err = FileLock::acquire(&path, LockMode::Shared, &fast_policy(3)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { attempts: 3 }));
    }

    #[test]
    fn shared_excludes_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        let _reader = FileLock::acquire(&path, LockMode::Shared, &fast_policy(1)).unwrap();
        let err = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(2)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        {
            let _lock = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        }

        let _again = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");

        let mut lock = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        lock.release();
        lock.release();
        assert!(!lock.is_held());

        let _other = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        drop(lock);
    }

    #[test]
    fn released_on_early_return() {
        fn fails_while_locked(path: &Path) -> LockResult<()> {
            let _lock = FileLock::acquire(path, LockMode::Exclusive, &fast_policy(1))?;
            Err(LockError::Io(io::Error::other("simulated failure")))
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");
        assert!(fails_while_locked(&path).is_err());
        let _lock = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
    }

    #[test]
    fn waits_for_release_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");
        let holder = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let path2 = path.clone();
        let handle = thread::spawn(move || {
            let policy = RetryPolicy {
                max_attempts: 50,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
            };
            tx.send(()).unwrap();
            FileLock::acquire(&path2, LockMode::Shared, &policy).is_ok()
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        drop(holder);

        assert!(handle.join().unwrap(), "waiter should get the lock after release");
    }

    #[test]
    fn permanently_held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");
        let _holder = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();

        let policy = fast_policy(4);
        let start = Instant::now();
        let result = FileLock::acquire(&path, LockMode::Exclusive, &policy);
        assert!(matches!(result, Err(LockError::Timeout { attempts: 4 })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn lock_file_on_open_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o");
        std::fs::write(&path, b"object").unwrap();

        let file = File::open(&path).unwrap();
        let lock = FileLock::lock_file(file, &path, LockMode::Shared, &fast_policy(1)).unwrap();
        assert_eq!(lock.mode(), LockMode::Shared);

        let err = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { attempts: 1 }));
    }

    #[test]
    fn read_only_lock_file_still_locks() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.o.lock");
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();

        let reader = FileLock::acquire(&path, LockMode::Shared, &fast_policy(1)).unwrap();
        assert!(reader.is_held());
        let err = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { attempts: 1 }));
        drop(reader);

        let writer = FileLock::acquire(&path, LockMode::Exclusive, &fast_policy(1)).unwrap();
        assert_eq!(writer.mode(), LockMode::Exclusive);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("slot.o.lock");
        let err = FileLock::acquire(&path, LockMode::Shared, &fast_policy(1)).unwrap_err();
        assert!(matches!(err, LockError::Io(_)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(30),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(5));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(30));
        assert_eq!(policy.backoff(40), Duration::from_millis(30));
        assert_eq!(policy.max_wait(), Duration::from_millis(5 + 10 + 20 + 30 + 30));
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_wait(), Duration::ZERO);
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(zero.attempts(), 1);
    }
}
