//! The `download` subcommand: one acquisition batch with progress bars.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use acquire::{SyncObserver, SyncOptions, SyncStats};

#[derive(Debug, clap::Args)]
pub struct DownloadArgs {
    /// Re-attempt apps whose previous download failed
    #[clap(long)]
    retry_failed: bool,

    /// Directory holding the lock file and the downloaded archives
    #[clap(long, default_value = "./data")]
    cache_dir: PathBuf,

    /// JSON file with studio bearer tokens (prod/staging/dev)
    #[clap(long, default_value = "./keys.json")]
    key_path: PathBuf,

    /// Maximum concurrent requests per hostname
    #[clap(long, default_value_t = 4)]
    per_host: usize,
}

pub fn run(args: DownloadArgs) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(args))
}

async fn run_async(args: DownloadArgs) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing up and writing the lock file");
                cancel.cancel();
            }
        });
    }

    let progress = Arc::new(Progress::new());
    let observer: Arc<dyn SyncObserver> = progress.clone();
    let options = SyncOptions {
        cache_dir: args.cache_dir,
        key_path: args.key_path,
        retry_failed: args.retry_failed,
        per_host: args.per_host,
        ..SyncOptions::default()
    };
    let stats = acquire::run(options, observer, cancel).await?;
    progress.finish();
    print_summary(&stats);

    // Partial failures are reported in the summary; only configuration
    // problems (above) fail the command.
    Ok(())
}

fn print_summary(stats: &SyncStats) {
    for cluster in &stats.clusters_stale {
        println!("⚠ fetching deployments for {cluster} failed; previous apps were kept but not updated");
    }
    for deployment in &stats.deployments_stale {
        println!("⚠ no matching release for {deployment}; the previous revision was kept");
    }
    println!("{}", stats.summary().join("  ·  "));
    if stats.total_apps > 0 {
        println!("{}", stats.per_env_summary().join("  ·  "));
    }
}

/// Terminal progress: one bar for clusters, one for deployments, and a
/// transient bar per in-flight download.
struct Progress {
    multi: MultiProgress,
    clusters: ProgressBar,
    deployments: ProgressBar,
    downloads: Mutex<std::collections::HashMap<String, ProgressBar>>,
}

impl Progress {
    fn new() -> Progress {
        let multi = MultiProgress::new();
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}",
        )
        .expect("static progress template")
        .progress_chars("=> ");

        let clusters = multi.add(ProgressBar::new(0).with_style(style.clone()));
        clusters.set_message("Fetching deployments");
        clusters.enable_steady_tick(Duration::from_millis(100));

        let deployments = multi.add(ProgressBar::new(0).with_style(style));
        deployments.set_message("Updating apps");

        Progress {
            multi,
            clusters,
            deployments,
            downloads: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn finish(&self) {
        self.clusters.finish();
        self.deployments.finish();
    }
}

impl SyncObserver for Progress {
    fn clusters_resolved(&self, orgs: usize, clusters: usize) {
        self.clusters.set_length(clusters as u64);
        self.clusters
            .set_message(format!("Fetching deployments ({orgs} orgs)"));
    }

    fn cluster_complete(&self, deployments_so_far: usize) {
        self.clusters.inc(1);
        self.deployments.set_length(deployments_so_far as u64);
    }

    fn deployment_complete(&self) {
        self.deployments.inc(1);
    }

    fn download_started(&self, key: &str) {
        let bar = self.multi.add(
            ProgressBar::new(0).with_style(
                ProgressStyle::with_template("  {msg} {bytes}/{total_bytes}")
                    .expect("static progress template"),
            ),
        );
        bar.set_message(key.to_owned());
        self.downloads.lock().unwrap().insert(key.to_owned(), bar);
    }

    fn download_progress(&self, key: &str, completed: u64, total: Option<u64>) {
        if let Some(bar) = self.downloads.lock().unwrap().get(key) {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(completed);
        }
    }

    fn download_finished(&self, key: &str, _ok: bool) {
        if let Some(bar) = self.downloads.lock().unwrap().remove(key) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}
