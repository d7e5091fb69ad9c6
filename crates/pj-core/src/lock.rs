//! Per-workspace file-backed mutual exclusion
//!
//! Connection attempts to the same logical workspace are serialized with an
//! advisory file lock. The lock file lives under the process-wide config
//! directory so separate invocations contend on the same path. Acquisition
//! polls rather than blocking so it can observe cancellation and emit
//! progress notices while another process holds the lock.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fs2::FileExt;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::LockError;

/// How often a blocked acquire re-attempts the lock
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often a blocked acquire tells the operator it is still waiting.
/// Deliberately slower than the poll interval to avoid log spam.
pub const LOCK_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// How long acquire waits before giving up
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Lock file name within the workspace locks directory
const LOCK_FILE_NAME: &str = "workspace.lock";

/// A timed, file-backed lock for one workspace identity.
///
/// Construction is cheap and does no I/O; the lock file is created lazily on
/// first use, exactly once even under concurrent calls. `release` is
/// idempotent and safe to call before a successful `acquire`.
pub struct WorkspaceLock {
    name: String,
    path: PathBuf,
    file: OnceCell<File>,
    held: AtomicBool,
}

impl WorkspaceLock {
    /// Lock for a workspace identity, using the default lock path
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = config::locks_dir(&name).join(LOCK_FILE_NAME);
        Self::with_path(name, path)
    }

    /// Lock backed by an explicit file path
    pub fn with_path(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            file: OnceCell::new(),
            held: AtomicBool::new(false),
        }
    }

    /// Open (and create if missing) the lock file, once per instance
    async fn init(&self) -> Result<&File, LockError> {
        self.file
            .get_or_try_init(|| async {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                    // Different local users contend on the same lock path
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o777));
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(&self.path)?;
                Ok(file)
            })
            .await
    }

    /// Acquire the lock, waiting up to [`LOCK_ACQUIRE_TIMEOUT`].
    ///
    /// Returns `LockError::Interrupted` promptly if `cancel` fires while
    /// waiting and `LockError::Timeout` once the window elapses.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        let file = self.init().await?;
        tracing::debug!(workspace = %self.name, "acquiring workspace lock");

        let deadline = Instant::now() + LOCK_ACQUIRE_TIMEOUT;
        let mut last_notice = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.held.store(true, Ordering::SeqCst);
                    tracing::debug!(workspace = %self.name, "acquired workspace lock");
                    return Ok(());
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(LockError::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    name: self.name.clone(),
                });
            }

            if last_notice.elapsed() >= LOCK_PROGRESS_INTERVAL {
                tracing::info!(
                    "Waiting to lock workspace {}: another process is running that blocks it",
                    self.name
                );
                last_notice = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return Err(LockError::Interrupted),
            }
        }
    }

    /// Release the lock.
    ///
    /// Safe to call any number of times, including before `acquire` ever
    /// succeeded. Unlock failures are logged, never propagated.
    pub fn release(&self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(file) = self.file.get() {
            if let Err(e) = file.unlock() {
                tracing::warn!(workspace = %self.name, "error unlocking workspace: {}", e);
            }
        }
    }
}

/// Whether a lock attempt failed because another holder exists
fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn lock_pair(dir: &TempDir) -> (WorkspaceLock, WorkspaceLock) {
        let path = dir.path().join("workspace.lock");
        (
            WorkspaceLock::with_path("web", path.clone()),
            WorkspaceLock::with_path("web", path),
        )
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let (first, _) = lock_pair(&dir);
        let cancel = CancellationToken::new();

        first.acquire(&cancel).await.unwrap();
        first.release();
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let (first, second) = lock_pair(&dir);
        let cancel = CancellationToken::new();

        first.acquire(&cancel).await.unwrap();

        let second = Arc::new(second);
        let contender = {
            let second = Arc::clone(&second);
            let cancel = cancel.clone();
            tokio::spawn(async move { second.acquire(&cancel).await })
        };

        // The contender must still be polling while the first holder exists
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!contender.is_finished());

        first.release();
        contender.await.unwrap().unwrap();
        second.release();
    }

    #[tokio::test]
    async fn cancelled_acquire_returns_promptly() {
        let dir = TempDir::new().unwrap();
        let (first, second) = lock_pair(&dir);
        let cancel = CancellationToken::new();

        first.acquire(&cancel).await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let started = std::time::Instant::now();
        let err = second.acquire(&cancelled).await.unwrap_err();
        assert!(matches!(err, LockError::Interrupted));
        // Bounded by the poll interval, nowhere near the acquire timeout
        assert!(started.elapsed() < LOCK_ACQUIRE_TIMEOUT / 2);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (first, _) = lock_pair(&dir);

        // Never acquired: must not panic or block
        first.release();
        first.release();

        let cancel = CancellationToken::new();
        first.acquire(&cancel).await.unwrap();
        first.release();
        first.release();
    }

    #[tokio::test]
    async fn lock_file_is_created_on_first_use() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("workspace.lock");
        let lock = WorkspaceLock::with_path("web", path.clone());

        assert!(!path.exists());
        lock.acquire(&CancellationToken::new()).await.unwrap();
        assert!(path.exists());
        lock.release();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lock_directory_is_writable_by_any_user() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks").join("workspace.lock");
        let lock = WorkspaceLock::with_path("web", path.clone());

        lock.acquire(&CancellationToken::new()).await.unwrap();
        let mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o777);
        lock.release();
    }
}
