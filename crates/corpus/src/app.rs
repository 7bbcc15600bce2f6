use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use models::{Environment, StudioEnvironment};

use crate::session::Session;
use crate::Datum;

#[derive(Debug)]
pub(crate) struct Descriptor {
    pub env: Environment,
    pub org: String,
    pub app: String,
    pub commit_sha: String,
    pub studio_env: StudioEnvironment,
    pub archive_dir: PathBuf,
}

impl Descriptor {
    pub fn key(&self) -> String {
        models::app_key(self.env, &self.org, &self.app)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(format!("{}.zip", self.key()))
    }

    /// Permalink to a file of this revision: the archive path minus its
    /// leading repository directory, under `{repo}/src/commit/{sha}`.
    pub fn remote_file_url(&self, archive_path: &str) -> String {
        let relative = archive_path.strip_prefix(&self.app).unwrap_or(archive_path);
        format!(
            "{}/src/commit/{}{}",
            models::repo_url(self.studio_env, &self.org, &self.app),
            self.commit_sha,
            relative,
        )
    }
}

/// One application of the corpus: an immutable descriptor plus the data
/// attached to it by `select`.
///
/// An `App` opens its archive only inside [`App::scope`]; while a scope
/// is active the app is flagged open, and copying an open app is a
/// programmer error (the copy would alias a live file handle).
#[derive(Debug)]
pub struct App {
    pub(crate) desc: Arc<Descriptor>,
    pub(crate) data: Arc<IndexMap<String, Datum>>,
    open: Arc<AtomicBool>,
}

impl App {
    pub(crate) fn new(desc: Descriptor) -> App {
        App {
            desc: Arc::new(desc),
            data: Arc::new(IndexMap::new()),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn env(&self) -> Environment {
        self.desc.env
    }

    pub fn org(&self) -> &str {
        &self.desc.org
    }

    pub fn name(&self) -> &str {
        &self.desc.app
    }

    pub fn commit_sha(&self) -> &str {
        &self.desc.commit_sha
    }

    pub fn studio_env(&self) -> StudioEnvironment {
        self.desc.studio_env
    }

    pub fn key(&self) -> String {
        self.desc.key()
    }

    /// Repository identity across environments: `{org}-{app}`.
    pub fn repo_key(&self) -> String {
        format!("{}-{}", self.desc.org, self.desc.app)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.desc.archive_path()
    }

    pub fn app_url(&self) -> String {
        models::app_url(self.desc.env, &self.desc.org, &self.desc.app)
    }

    pub fn repo_url(&self) -> String {
        models::repo_url(self.desc.studio_env, &self.desc.org, &self.desc.app)
    }

    pub fn commit_url(&self) -> String {
        format!("{}/src/commit/{}", self.repo_url(), self.desc.commit_sha)
    }

    /// Data attached by the most recent `select`, in column order.
    pub fn data(&self) -> &IndexMap<String, Datum> {
        &self.data
    }

    pub fn get(&self, column: &str) -> Option<&Datum> {
        self.data.get(column)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Run `f` within an open archive session. The archive is acquired
    /// lazily on first content access and released when `f` returns —
    /// on panic too. Opening an already-open app is a programmer error.
    pub fn scope<R>(&self, f: impl FnOnce(&Session<'_>) -> R) -> R {
        if self.open.swap(true, Ordering::SeqCst) {
            panic!(
                "attempted to open app {} twice; its archive session is already active",
                self.key()
            );
        }
        let session = Session::new(self, Arc::clone(&self.open));
        f(&session)
    }

    /// A shallow copy carrying `data` instead of the current mapping.
    /// The archive session is never carried over.
    pub(crate) fn with_data(&self, data: IndexMap<String, Datum>) -> App {
        App {
            desc: Arc::clone(&self.desc),
            data: Arc::new(data),
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Clone for App {
    fn clone(&self) -> Self {
        if self.is_open() {
            panic!(
                "attempted to copy app {} while its archive session is open",
                self.key()
            );
        }
        App {
            desc: Arc::clone(&self.desc),
            data: Arc::clone(&self.data),
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.desc.env, self.desc.org, self.desc.app)?;
        for (column, value) in self.data.iter() {
            write!(f, " {column}={value}")?;
        }
        Ok(())
    }
}

/// Build the descriptor for a successful lock entry.
pub(crate) fn from_lock_entry(entry: &models::LockEntry, archive_dir: &Path) -> App {
    App::new(Descriptor {
        env: entry.env,
        org: entry.org.clone(),
        app: entry.app.clone(),
        commit_sha: entry.commit_sha.clone(),
        studio_env: entry.studio_env,
        archive_dir: archive_dir.to_owned(),
    })
}
