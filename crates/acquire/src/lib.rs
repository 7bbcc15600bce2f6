//! Fleet acquisition: orgs → clusters → deployments → releases → archives.
//!
//! Each run is an idempotent batch. The previous lock file seeds the run;
//! every deployment discovered upstream either reuses its previous entry,
//! resolves to a fresh release and downloads its archive, or carries the
//! previous entry forward with a warning when the upstream view could not
//! be refreshed. At the end the new lock is written atomically and
//! archives for keys that fell out of the lock are removed.
//!
//! Fan-out is unbounded task concurrency at every stage; the broker's
//! per-host permits bound the real parallelism.

mod stats;
mod syncer;

pub use stats::SyncStats;
pub use syncer::{Endpoints, ProductionEndpoints, Syncer};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory holding `.apps.lock.json` and the `{key}.zip` archives.
    pub cache_dir: PathBuf,
    /// Path of the studio bearer-token file.
    pub key_path: PathBuf,
    /// Re-attempt downloads whose previous run failed.
    pub retry_failed: bool,
    /// Maximum concurrent requests per hostname.
    pub per_host: usize,
    /// Total attempts per request.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            cache_dir: PathBuf::from("./data"),
            key_path: PathBuf::from("./keys.json"),
            retry_failed: false,
            per_host: 4,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Progress callbacks for a front-end (terminal progress bars, tests).
/// All methods have no-op defaults; the engine never blocks on them.
pub trait SyncObserver: Send + Sync {
    fn clusters_resolved(&self, _orgs: usize, _clusters: usize) {}
    fn cluster_complete(&self, _deployments_so_far: usize) {}
    fn deployment_complete(&self) {}
    fn download_started(&self, _key: &str) {}
    fn download_progress(&self, _key: &str, _completed: u64, _total: Option<u64>) {}
    fn download_finished(&self, _key: &str, _ok: bool) {}
}

/// The default observer: silence.
pub struct NullObserver;

impl SyncObserver for NullObserver {}

/// Run one acquisition batch to completion (or until `cancel` fires, in
/// which case in-flight downloads abort, their partial files are removed,
/// and the lock is still written from whatever was reconciled).
pub async fn run(
    options: SyncOptions,
    observer: Arc<dyn SyncObserver>,
    cancel: CancellationToken,
) -> anyhow::Result<SyncStats> {
    let syncer = Syncer::new(options, observer, cancel)?;
    syncer.run().await
}
