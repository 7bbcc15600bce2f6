use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Environment, StudioEnvironment};

/// Terminal status of the last acquisition attempt for an app.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// One pinned revision: the persistent record behind `{key}.zip`.
///
/// A `success` entry means the archive existed on disk when the lock was
/// last written; a `failed` entry records that the last attempt failed so
/// that re-runs can skip it (or retry it, with `--retry-failed`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub env: Environment,
    pub org: String,
    pub app: String,
    pub version: String,
    pub commit_sha: String,
    pub status: Status,
    pub studio_env: StudioEnvironment,
}

impl LockEntry {
    pub fn key(&self) -> String {
        crate::app_key(self.env, &self.org, &self.app)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// The on-disk lock map, keyed by `{env}-{org}-{app}`.
///
/// A `BTreeMap` keeps serialization order deterministic, which is what
/// makes a no-change re-run write byte-identical lock files.
pub type VersionLock = BTreeMap<String, LockEntry>;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to read lock file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock file {} is not valid JSON", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write lock file {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the lock once at start and rewrites it atomically at finish.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

pub const LOCK_FILE_NAME: &str = ".apps.lock.json";

impl LockStore {
    pub fn new(cache_dir: &Path) -> Self {
        LockStore {
            path: cache_dir.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An absent lock file is an empty corpus, not an error.
    pub fn read(&self) -> Result<VersionLock, LockError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VersionLock::new())
            }
            Err(source) => {
                return Err(LockError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| LockError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Write-temp + rename so a crash never leaves a torn lock file.
    pub fn write(&self, lock: &VersionLock) -> Result<(), LockError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let write = |path: &Path| -> Result<(), std::io::Error> {
            let mut file = tempfile::NamedTempFile::new_in(dir)?;
            serde_json::to_writer_pretty(&mut file, lock)?;
            file.write_all(b"\n")?;
            file.persist(path)?;
            Ok(())
        };
        write(&self.path).map_err(|source| LockError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(env: Environment, org: &str, app: &str, status: Status) -> LockEntry {
        LockEntry {
            env,
            org: org.to_owned(),
            app: app.to_owned(),
            version: "1.0.0".to_owned(),
            commit_sha: "deadbeef".to_owned(),
            status,
            studio_env: StudioEnvironment::Prod,
        }
    }

    #[test]
    fn missing_lock_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::new(dir.path());
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn lock_round_trips_and_rewrites_identically() {
        let dir = tempfile::tempdir().unwrap();
        let store = LockStore::new(dir.path());

        let mut lock = VersionLock::new();
        for entry in [
            entry(Environment::Prod, "ttd", "app-a", Status::Success),
            entry(Environment::Tt02, "ttd", "app-b", Status::Failed),
        ] {
            lock.insert(entry.key(), entry);
        }

        store.write(&lock).unwrap();
        let first = std::fs::read(store.path()).unwrap();
        let read_back = store.read().unwrap();
        assert_eq!(read_back, lock);

        store.write(&read_back).unwrap();
        let second = std::fs::read(store.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn entry_wire_format() {
        let entry = entry(Environment::Prod, "ttd", "frontend-test", Status::Success);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "env": "prod",
                "org": "ttd",
                "app": "frontend-test",
                "version": "1.0.0",
                "commit_sha": "deadbeef",
                "status": "success",
                "studio_env": "prod",
            })
        );
    }

    #[test]
    fn corrupt_lock_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), b"{not json").unwrap();
        let store = LockStore::new(dir.path());
        assert!(matches!(store.read(), Err(LockError::Parse { .. })));
    }
}
