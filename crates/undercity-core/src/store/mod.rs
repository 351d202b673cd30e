//! State Store: atomic-rename JSON persistence with per-file advisory locks.
//!
//! Grounded on `bobisme-maw`'s op log write discipline (`src/oplog/write.rs`)
//! for the "one writer at a time, CAS-guarded" shape, generalized from git
//! blobs to plain JSON documents per spec.md §4.1: every write goes
//! temp-sibling → fsync → rename, and corrupt/truncated documents parse
//! soft to the type's `Default` rather than propagating an error.

mod lock;

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use lock::FileLock;

/// Errors from State Store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Lock acquisition failed after the retry budget was exhausted.
    StaleLockOrContention,
    /// An I/O error occurred during a read, write, or lock operation.
    Io(std::io::Error),
    /// Serialization failed — this is a programmer error (the type being
    /// written doesn't round-trip through `serde_json`), not a runtime
    /// condition callers should need to handle.
    Serialize(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleLockOrContention => write!(
                f,
                "could not acquire state store lock: held by a live process past the retry budget"
            ),
            Self::Io(e) => write!(f, "state store I/O error: {e}"),
            Self::Serialize(e) => write!(f, "state store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialize(e) => Some(e),
            Self::StaleLockOrContention => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Key-value persistence rooted at `.undercity/` (or wherever `root` points).
#[derive(Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// `root` is typically `<repo>/.undercity`. Created on first use if
    /// it doesn't already exist.
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Read a document at `rel_path`. A missing or corrupt/truncated file
    /// yields `T::default()` rather than an error — readers never observe
    /// a torn write (writes are atomic-rename) but must tolerate a
    /// concurrent writer's temp file disappearing mid-read, which surfaces
    /// as a parse failure here and is treated the same way.
    pub fn read<T: DeserializeOwned + Default>(&self, rel_path: &str) -> T {
        let path = self.resolve(rel_path);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    /// Atomically write `value` to `rel_path`: serialize, write to a `.tmp`
    /// sibling, fsync, rename over the target.
    pub fn write<T: Serialize>(&self, rel_path: &str, value: &T) -> Result<(), StoreError> {
        let path = self.resolve(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        let bytes = serde_json::to_vec_pretty(value).map_err(StoreError::Serialize)?;
        {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Acquire the advisory lock for `rel_path`, run `f`, then release —
    /// guaranteeing the lock is dropped even if `f` returns an error.
    /// `f` must never itself block on a model round-trip (see spec.md §5).
    pub fn with_lock<R>(
        &self,
        rel_path: &str,
        f: impl FnOnce() -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let path = self.resolve(rel_path);
        let lock = FileLock::acquire(&path)?;
        let result = f();
        lock.release()?;
        result
    }

    /// Append-only line-delimited write: used by `metrics.jsonl` and
    /// similar logs that are never rewritten, only ever grown.
    pub fn append_line(&self, rel_path: &str, line: &str) -> Result<(), StoreError> {
        let path = self.resolve(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(f, "{line}")?;
        f.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Default, Serialize, Deserialize, PartialEq, Debug)]
    struct Doc {
        n: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        store.write("doc.json", &Doc { n: 7 }).unwrap();
        let back: Doc = store.read("doc.json");
        assert_eq!(back, Doc { n: 7 });
    }

    #[test]
    fn missing_file_reads_as_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        let back: Doc = store.read("missing.json");
        assert_eq!(back, Doc::default());
    }

    #[test]
    fn corrupt_file_reads_as_default_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        std::fs::write(tmp.path().join("bad.json"), b"{not valid json").unwrap();
        let back: Doc = store.read("bad.json");
        assert_eq!(back, Doc::default());
    }

    #[test]
    fn with_lock_releases_on_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        let _: Result<(), StoreError> =
            store.with_lock("doc.json", || Err(StoreError::StaleLockOrContention));
        // A second acquisition must succeed promptly -- the lock was released.
        let lock = FileLock::acquire(&tmp.path().join("doc.json")).unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn append_line_grows_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        store.append_line("log.jsonl", "{\"a\":1}").unwrap();
        store.append_line("log.jsonl", "{\"a\":2}").unwrap();
        let contents = std::fs::read_to_string(tmp.path().join("log.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn write_never_leaves_tmp_sibling_after_success() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        store.write("doc.json", &Doc { n: 1 }).unwrap();
        assert!(!tmp.path().join("doc.json.tmp").exists());
    }
}
