//! Advisory file locks: a sibling `<file>.lock` containing `{pid, timestamp}`.
//!
//! Grounded on the single-writer discipline in `bobisme-maw`'s op log
//! (`src/oplog/write.rs`'s CAS-guarded `append_operation`), adapted here to
//! the plain pid+timestamp lock file spec.md §4.1 calls for rather than a
//! git-ref CAS (the State Store has no git object store to anchor a CAS on).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::StoreError;

const STALE_AFTER: Duration = Duration::from_secs(30);
const MAX_BACKOFF_TOTAL: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize)]
struct LockFile {
    pid: u32,
    /// Unix epoch seconds.
    acquired_at: u64,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn lock_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(".lock");
    PathBuf::from(p)
}

/// True if the process named by `pid` appears to be dead.
///
/// On Linux this checks `/proc/<pid>`; on other platforms we have no cheap
/// portable signal-0 check without a dependency, so we conservatively
/// assume the process is alive and let the 30s staleness window be the
/// fallback reclaim path.
fn pid_is_dead(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        !Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        false
    }
}

fn is_stale(lock: &LockFile) -> bool {
    let age = now_epoch_secs().saturating_sub(lock.acquired_at);
    age >= STALE_AFTER.as_secs() || pid_is_dead(lock.pid)
}

/// A held advisory lock. Dropping it is not sufficient to release it —
/// call [`FileLock::release`] explicitly so release errors are observable.
pub struct FileLock {
    path: PathBuf,
    pid: u32,
}

impl FileLock {
    /// Acquire the lock on `target`, retrying with truncated exponential
    /// backoff for up to ~10s. A lock held by a dead pid or older than 30s
    /// is reclaimed rather than waited out.
    pub fn acquire(target: &Path) -> Result<Self, StoreError> {
        let path = lock_path(target);
        let pid = std::process::id();
        let mut backoff = Duration::from_millis(20);
        let mut waited = Duration::ZERO;

        loop {
            match try_create(&path, pid) {
                Ok(()) => return Ok(Self { path, pid }),
                Err(CreateErr::AlreadyExists) => {
                    if let Some(existing) = read_lock(&path) {
                        if is_stale(&existing) {
                            let _ = std::fs::remove_file(&path);
                            continue;
                        }
                    } else {
                        // Unreadable/corrupt lock file — treat as stale.
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                }
                Err(CreateErr::Io(e)) => return Err(StoreError::Io(e)),
            }

            if waited >= MAX_BACKOFF_TOTAL {
                return Err(StoreError::StaleLockOrContention);
            }
            std::thread::sleep(backoff);
            waited += backoff;
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }
    }

    /// Release the lock, but only if it still belongs to this process —
    /// a lock reclaimed out from under us by a staleness sweep must not be
    /// deleted by our stale handle.
    pub fn release(self) -> Result<(), StoreError> {
        if let Some(existing) = read_lock(&self.path) {
            if existing.pid == self.pid {
                std::fs::remove_file(&self.path).map_err(StoreError::Io)?;
            }
        }
        Ok(())
    }
}

enum CreateErr {
    AlreadyExists,
    Io(std::io::Error),
}

fn try_create(path: &Path, pid: u32) -> Result<(), CreateErr> {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                CreateErr::AlreadyExists
            } else {
                CreateErr::Io(e)
            }
        })?;
    let contents = serde_json::to_vec(&LockFile {
        pid,
        acquired_at: now_epoch_secs(),
    })
    .expect("LockFile serializes");
    f.write_all(&contents).map_err(CreateErr::Io)?;
    Ok(())
}

fn read_lock(path: &Path) -> Option<LockFile> {
    let raw = std::fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("doc.json");
        let lock = FileLock::acquire(&target).unwrap();
        assert!(lock_path(&target).exists());
        lock.release().unwrap();
        assert!(!lock_path(&target).exists());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("doc.json");
        let path = lock_path(&target);
        let stale = LockFile {
            pid: 999_999_999, // very unlikely to be a live pid
            acquired_at: 0,   // epoch 0 -> definitely stale
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = FileLock::acquire(&target).expect("stale lock should be reclaimed");
        lock.release().unwrap();
    }

    #[test]
    fn release_does_not_delete_a_lock_owned_by_another_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("doc.json");
        let lock = FileLock::acquire(&target).unwrap();
        // Simulate another process having reclaimed the lock.
        let path = lock_path(&target);
        std::fs::write(
            &path,
            serde_json::to_vec(&LockFile {
                pid: lock.pid + 1,
                acquired_at: now_epoch_secs(),
            })
            .unwrap(),
        )
        .unwrap();
        lock.release().unwrap();
        assert!(path.exists(), "release must not remove another pid's lock");
    }
}
