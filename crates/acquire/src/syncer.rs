use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use broker::{Broker, BrokerOptions};
use models::{
    Cluster, Deployment, Environment, LockEntry, LockStore, OrgsResponse, RawDeployment,
    Release, ReleasesResponse, Status, StudioEnvironment, StudioKeys, VersionLock,
};

use crate::{SyncObserver, SyncOptions, SyncStats};

/// Where the remote endpoints live. Production talks to the public hosts;
/// tests point this at a loopback server.
pub trait Endpoints: Send + Sync {
    fn orgs_url(&self) -> String;
    fn deployments_url(&self, cluster: &Cluster) -> String;
    fn releases_url(&self, deployment: &Deployment, studio_env: StudioEnvironment) -> String;
    fn archive_url(&self, release: &Release) -> String;
}

/// The public hosts: altinncdn, the per-org app domains, and the
/// studio flavors.
pub struct ProductionEndpoints;

impl Endpoints for ProductionEndpoints {
    fn orgs_url(&self) -> String {
        models::ORGS_URL.to_owned()
    }

    fn deployments_url(&self, cluster: &Cluster) -> String {
        cluster.deployments_url()
    }

    fn releases_url(&self, deployment: &Deployment, studio_env: StudioEnvironment) -> String {
        deployment.releases_url(studio_env)
    }

    fn archive_url(&self, release: &Release) -> String {
        release.archive_url()
    }
}

/// One acquisition run's worth of state.
///
/// `next` is only ever inserted into, and every task owns the unique
/// deployment key it writes, so a plain mutex around the map suffices.
pub struct Syncer {
    broker: Broker,
    keys: StudioKeys,
    options: SyncOptions,
    endpoints: Arc<dyn Endpoints>,
    store: LockStore,
    prev: VersionLock,
    next: Mutex<VersionLock>,
    stats: Mutex<SyncStats>,
    observer: Arc<dyn SyncObserver>,
    cancel: CancellationToken,
}

impl Syncer {
    pub fn new(
        options: SyncOptions,
        observer: Arc<dyn SyncObserver>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let keys = StudioKeys::load(&options.key_path)?;
        std::fs::create_dir_all(&options.cache_dir).with_context(|| {
            format!("failed to create cache dir {}", options.cache_dir.display())
        })?;
        let store = LockStore::new(&options.cache_dir);
        let prev = store.read()?;
        let broker = Broker::new(BrokerOptions {
            per_host: options.per_host,
            max_attempts: options.max_attempts,
            retry_delay: options.retry_delay,
        })
        .context("failed to build the HTTP client")?;

        Ok(Syncer {
            broker,
            keys,
            options,
            endpoints: Arc::new(ProductionEndpoints),
            store,
            prev,
            next: Mutex::new(VersionLock::new()),
            stats: Mutex::new(SyncStats::default()),
            observer,
            cancel,
        })
    }

    pub fn with_endpoints(mut self, endpoints: Arc<dyn Endpoints>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub async fn run(self) -> anyhow::Result<SyncStats> {
        let clusters = self.get_clusters().await;
        {
            let stats = self.stats.lock().unwrap();
            self.observer.clusters_resolved(stats.orgs, stats.clusters);
        }

        futures::stream::iter(clusters)
            .for_each_concurrent(None, |cluster| self.update_cluster(cluster))
            .await;

        if self.cancel.is_cancelled() {
            tracing::warn!("cancelled; writing the lock from partial progress");
        }
        self.finish()
    }

    fn insert_next(&self, key: String, entry: LockEntry) {
        self.next.lock().unwrap().insert(key, entry);
    }

    /// Copy all previous entries of a cluster into the new lock.
    fn carry_cluster(&self, cluster: &Cluster) -> bool {
        let mut carried = false;
        let mut next = self.next.lock().unwrap();
        for (key, entry) in &self.prev {
            if entry.env == cluster.env && entry.org == cluster.org {
                next.insert(key.clone(), entry.clone());
                carried = true;
            }
        }
        carried
    }

    // Stage 1: the public orgs document, mapped to (env, org) clusters.
    async fn get_clusters(&self) -> Vec<Cluster> {
        match self
            .broker
            .fetch_json::<OrgsResponse>(&self.endpoints.orgs_url())
            .await
        {
            Ok(response) => {
                let mut clusters = Vec::new();
                for (org, raw) in &response.orgs {
                    for env in raw.environments.iter().filter_map(|tag| Environment::from_raw(tag))
                    {
                        clusters.push(Cluster {
                            env,
                            org: org.clone(),
                        });
                    }
                }
                let mut stats = self.stats.lock().unwrap();
                stats.orgs = response
                    .orgs
                    .values()
                    .filter(|org| !org.environments.is_empty())
                    .count();
                stats.clusters = clusters.len();
                clusters
            }
            Err(err) => {
                // Without the orgs document nothing can be refreshed this
                // run. Keep the whole previous lock so a CDN hiccup can
                // never wipe the corpus.
                tracing::warn!(error = %err, "fetching orgs failed; keeping all previously acquired apps");
                self.stats.lock().unwrap().orgs_fetch_failed = true;
                let mut next = self.next.lock().unwrap();
                for (key, entry) in &self.prev {
                    next.insert(key.clone(), entry.clone());
                }
                Vec::new()
            }
        }
    }

    async fn update_cluster(&self, cluster: Cluster) {
        let deployments = self.get_deployments(&cluster).await;
        {
            let stats = self.stats.lock().unwrap();
            self.observer.cluster_complete(stats.deployments);
        }
        futures::stream::iter(deployments)
            .for_each_concurrent(None, |deployment| self.update_deployment(deployment))
            .await;
    }

    // Stage 2: currently-running deployments of one cluster.
    async fn get_deployments(&self, cluster: &Cluster) -> Vec<Deployment> {
        if self.cancel.is_cancelled() {
            self.carry_cluster(cluster);
            return Vec::new();
        }
        match self
            .broker
            .fetch_json::<Vec<RawDeployment>>(&self.endpoints.deployments_url(cluster))
            .await
        {
            Ok(raw) => {
                let prefix = format!("{}-", cluster.org);
                let deployments: Vec<Deployment> = raw
                    .into_iter()
                    .filter_map(|deployment| {
                        let release = deployment.release?;
                        let version = deployment.version?;
                        if release == "kuberneteswrapper" {
                            return None;
                        }
                        let app = release
                            .strip_prefix(&prefix)
                            .unwrap_or(release.as_str())
                            .to_owned();
                        Some(Deployment {
                            env: cluster.env,
                            org: cluster.org.clone(),
                            app,
                            version,
                        })
                    })
                    .collect();
                self.stats.lock().unwrap().deployments += deployments.len();
                deployments
            }
            Err(err) => {
                // The cluster cannot be listed right now. Anything we
                // already hold for it survives the run, unrefreshed.
                if self.carry_cluster(cluster) {
                    tracing::warn!(cluster = %cluster, error = %err, "fetching deployments failed; previous apps kept but not updated");
                    self.stats
                        .lock()
                        .unwrap()
                        .clusters_stale
                        .push(cluster.to_string());
                } else {
                    tracing::debug!(cluster = %cluster, error = %err, "fetching deployments failed");
                }
                Vec::new()
            }
        }
    }

    async fn update_deployment(&self, deployment: Deployment) {
        if let Some(release) = self.resolve_release(&deployment).await {
            self.download_release(release).await;
        }
        self.observer.deployment_complete();
    }

    // Stage 3: match the deployed version against studio releases.
    async fn resolve_release(&self, deployment: &Deployment) -> Option<Release> {
        let key = deployment.key();
        let prev = self.prev.get(&key);

        if let Some(prev_entry) = prev {
            if prev_entry.status == Status::Failed && !self.options.retry_failed {
                self.stats.lock().unwrap().skipped_prior_failure += 1;
                self.insert_next(key, prev_entry.clone());
                return None;
            }
            if prev_entry.status == Status::Failed
                && self.options.retry_failed
                && deployment.version == prev_entry.version
            {
                // The lock already knows the revision; go straight to download.
                self.stats.lock().unwrap().releases_resolved += 1;
                return Some(Release {
                    env: deployment.env,
                    org: deployment.org.clone(),
                    app: deployment.app.clone(),
                    version: deployment.version.clone(),
                    commit_sha: prev_entry.commit_sha.clone(),
                    studio_env: prev_entry.studio_env,
                });
            }
            if prev_entry.status == Status::Success && deployment.version == prev_entry.version {
                self.stats.lock().unwrap().up_to_date += 1;
                self.insert_next(key, prev_entry.clone());
                return None;
            }
        }

        if self.cancel.is_cancelled() {
            if let Some(prev_entry) = prev {
                self.insert_next(key, prev_entry.clone());
            }
            return None;
        }

        // Probe the known studio environment if we have one, otherwise
        // every configured one in order, and take the first tag match.
        let candidates: Vec<StudioEnvironment> = match prev.map(|entry| entry.studio_env) {
            Some(known) => vec![known],
            None => self.keys.configured(),
        };
        let mut token_missing = false;
        for studio_env in candidates {
            if self.keys.token(studio_env).is_none() {
                // We know where the release lives but lost the credential
                // for that host. Nothing to probe.
                token_missing = true;
                continue;
            }
            let response = match self
                .broker
                .fetch_json::<ReleasesResponse>(&self.endpoints.releases_url(deployment, studio_env))
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(deployment = %deployment, studio_env = %studio_env, error = %err, "fetching releases failed");
                    continue;
                }
            };
            for release in response.results {
                if release.tag_name == deployment.version {
                    self.stats.lock().unwrap().releases_resolved += 1;
                    return Some(Release {
                        env: deployment.env,
                        org: deployment.org.clone(),
                        app: deployment.app.clone(),
                        version: deployment.version.clone(),
                        commit_sha: release.target_commitish,
                        studio_env,
                    });
                }
            }
        }

        // Nothing resolved. Keep what we had, if anything, and say why:
        // a missing credential is a different problem than a host that
        // no longer knows the tag.
        if let Some(prev_entry) = prev {
            if token_missing {
                tracing::warn!(deployment = %deployment, studio_env = %prev_entry.studio_env, "studio access token missing; previous revision kept but not updated");
            } else {
                tracing::warn!(deployment = %deployment, "no matching release; previous revision kept but not updated");
            }
            self.insert_next(key, prev_entry.clone());
            self.stats
                .lock()
                .unwrap()
                .deployments_stale
                .push(deployment.to_string());
        }
        self.stats.lock().unwrap().no_matching_release += 1;
        None
    }

    // Stage 4: stream the archive and pin the outcome in the lock.
    async fn download_release(&self, release: Release) {
        let key = release.key();
        let Some(token) = self.keys.token(release.studio_env) else {
            if let Some(prev_entry) = self.prev.get(&key) {
                self.insert_next(key, prev_entry.clone());
            }
            return;
        };

        let dest = self.options.cache_dir.join(format!("{key}.zip"));
        self.observer.download_started(&key);
        let progress_key = key.clone();
        let observer = Arc::clone(&self.observer);
        let on_progress = move |completed: u64, total: Option<u64>| {
            observer.download_progress(&progress_key, completed, total);
        };

        let result = self
            .broker
            .download_file(
                &self.endpoints.archive_url(&release),
                &dest,
                token,
                Some(&on_progress),
                &self.cancel,
            )
            .await;

        match result {
            Ok(()) => {
                self.stats.lock().unwrap().updated += 1;
                self.insert_next(key.clone(), release.into_lock_entry(Status::Success));
                self.observer.download_finished(&key, true);
            }
            Err(broker::Error::Cancelled { .. }) => {
                // The partial file is already gone; keep the previous pin
                // if there was one, otherwise record the failed attempt.
                match self.prev.get(&key) {
                    Some(prev_entry) => self.insert_next(key.clone(), prev_entry.clone()),
                    None => {
                        self.insert_next(key.clone(), release.into_lock_entry(Status::Failed))
                    }
                }
                self.observer.download_finished(&key, false);
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "download failed");
                self.stats.lock().unwrap().failed += 1;
                self.insert_next(key.clone(), release.into_lock_entry(Status::Failed));
                self.observer.download_finished(&key, false);
            }
        }
    }

    /// Write the new lock, then drop archives whose keys fell out of it.
    fn finish(self) -> anyhow::Result<SyncStats> {
        let next = self.next.into_inner().unwrap();
        self.store.write(&next)?;

        let mut stats = self.stats.into_inner().unwrap();
        for entry in next.values().filter(|entry| entry.is_success()) {
            *stats.apps_per_env.entry(entry.env).or_default() += 1;
        }
        stats.total_apps = stats.apps_per_env.values().sum();

        for key in self.prev.keys() {
            if next.contains_key(key) {
                continue;
            }
            let path = self.options.cache_dir.join(format!("{key}.zip"));
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove undeployed archive");
                }
            }
            stats.removed += 1;
        }

        Ok(stats)
    }
}
