use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use acquire::{Endpoints, NullObserver, SyncOptions, Syncer};
use models::{
    Cluster, Deployment, Environment, LockEntry, LockStore, Release, Status,
    StudioEnvironment,
};

/// Everything the mock fleet knows: orgs, per-cluster deployments,
/// per-studio releases, and archives, plus hit counters.
#[derive(Default)]
struct Universe {
    orgs: serde_json::Value,
    /// `{env}-{org}` → deployments payload; absent keys respond 500.
    deployments: HashMap<String, serde_json::Value>,
    /// `{studio}/{org}/{app}` → releases payload.
    releases: HashMap<String, serde_json::Value>,
    /// `{studio}/{org}/{app}/{sha}` → archive bytes.
    archives: HashMap<String, Vec<u8>>,
    archive_hits: Mutex<HashMap<String, usize>>,
    release_hits: Mutex<HashMap<String, usize>>,
}

type Shared = Arc<Universe>;

async fn serve(universe: Shared) -> SocketAddr {
    let router = Router::new()
        .route(
            "/orgs.json",
            get(|State(u): State<Shared>| async move { Json(u.orgs.clone()) }),
        )
        .route(
            "/clusters/:env/:org/deployments",
            get(
                |State(u): State<Shared>, UrlPath((env, org)): UrlPath<(String, String)>| async move {
                    match u.deployments.get(&format!("{env}-{org}")) {
                        Some(payload) => Ok(Json(payload.clone())),
                        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
                    }
                },
            ),
        )
        .route(
            "/studio/:studio/:org/:app/releases",
            get(
                |State(u): State<Shared>,
                 UrlPath((studio, org, app)): UrlPath<(String, String, String)>| async move {
                    let key = format!("{studio}/{org}/{app}");
                    *u.release_hits.lock().unwrap().entry(key.clone()).or_default() += 1;
                    match u.releases.get(&key) {
                        Some(payload) => Json(payload.clone()),
                        None => Json(serde_json::json!({"results": []})),
                    }
                },
            ),
        )
        .route(
            "/studio/:studio/:org/:app/archive/:sha",
            get(
                |State(u): State<Shared>,
                 UrlPath((studio, org, app, sha)): UrlPath<(String, String, String, String)>| async move {
                    let sha = sha.trim_end_matches(".zip");
                    let key = format!("{studio}/{org}/{app}/{sha}");
                    *u.archive_hits.lock().unwrap().entry(key.clone()).or_default() += 1;
                    match u.archives.get(&key) {
                        Some(bytes) => Ok(bytes.clone()),
                        None => Err(StatusCode::NOT_FOUND),
                    }
                },
            ),
        )
        .with_state(universe);

    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
        .serve(router.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

struct TestEndpoints {
    base: String,
}

impl Endpoints for TestEndpoints {
    fn orgs_url(&self) -> String {
        format!("{}/orgs.json", self.base)
    }

    fn deployments_url(&self, cluster: &Cluster) -> String {
        format!(
            "{}/clusters/{}/{}/deployments",
            self.base, cluster.env, cluster.org
        )
    }

    fn releases_url(&self, deployment: &Deployment, studio_env: StudioEnvironment) -> String {
        format!(
            "{}/studio/{}/{}/{}/releases",
            self.base, studio_env, deployment.org, deployment.app
        )
    }

    fn archive_url(&self, release: &Release) -> String {
        format!(
            "{}/studio/{}/{}/{}/archive/{}.zip",
            self.base, release.studio_env, release.org, release.app, release.commit_sha
        )
    }
}

fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn write_keys(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("keys.json");
    std::fs::write(&path, br#"{"prod": "prod-token", "dev": "dev-token"}"#).unwrap();
    path
}

fn options(cache_dir: &Path, key_path: &Path) -> SyncOptions {
    SyncOptions {
        cache_dir: cache_dir.to_owned(),
        key_path: key_path.to_owned(),
        retry_failed: false,
        per_host: 4,
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
    }
}

async fn run_sync(options: SyncOptions, base: String) -> acquire::SyncStats {
    let syncer = Syncer::new(options, Arc::new(NullObserver), CancellationToken::new())
        .unwrap()
        .with_endpoints(Arc::new(TestEndpoints { base }));
    syncer.run().await.unwrap()
}

fn lock_entry(
    env: Environment,
    org: &str,
    app: &str,
    version: &str,
    sha: &str,
    status: Status,
) -> LockEntry {
    LockEntry {
        env,
        org: org.to_owned(),
        app: app.to_owned(),
        version: version.to_owned(),
        commit_sha: sha.to_owned(),
        status,
        studio_env: StudioEnvironment::Prod,
    }
}

#[tokio::test]
async fn reconciles_lock_against_current_deployments() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_keys(dir.path());

    // Previous state: app-x pinned at v1, app-y failed at v1.
    let store = LockStore::new(dir.path());
    let mut prev = BTreeMap::new();
    for entry in [
        lock_entry(Environment::Prod, "a", "x", "1", "sha-x", Status::Success),
        lock_entry(Environment::Prod, "a", "y", "1", "sha-y", Status::Failed),
    ] {
        prev.insert(entry.key(), entry);
    }
    store.write(&prev).unwrap();
    std::fs::write(dir.path().join("prod-a-x.zip"), zip_bytes(&[("App/f", "x")])).unwrap();
    std::fs::write(dir.path().join("prod-a-y.zip"), b"stale").unwrap();

    // Current world: x still at v1, y gone, z new at v2.
    let archive_z = zip_bytes(&[("z-app/App/config/applicationmetadata.json", "{}")]);
    let mut universe = Universe {
        orgs: serde_json::json!({"orgs": {"a": {"environments": ["production"]}}}),
        ..Default::default()
    };
    universe.deployments.insert(
        "prod-a".to_owned(),
        serde_json::json!([
            {"release": "a-x", "version": "1"},
            {"release": "a-z", "version": "2"},
            {"release": "kuberneteswrapper", "version": "9"},
        ]),
    );
    universe.releases.insert(
        "prod/a/z".to_owned(),
        serde_json::json!({"results": [
            {"tagName": "1", "targetCommitish": "old-sha"},
            {"tagName": "2", "targetCommitish": "sha-z"},
        ]}),
    );
    universe
        .archives
        .insert("prod/a/z/sha-z".to_owned(), archive_z.clone());

    let addr = serve(Arc::new(universe)).await;
    let stats = run_sync(options(dir.path(), &key_path), format!("http://{addr}")).await;

    let lock = store.read().unwrap();
    // x untouched, z downloaded, y dropped together with its archive.
    assert_eq!(lock.len(), 2);
    assert_eq!(lock["prod-a-x"], prev["prod-a-x"]);
    assert_eq!(lock["prod-a-z"].commit_sha, "sha-z");
    assert_eq!(lock["prod-a-z"].status, Status::Success);
    assert!(!lock.contains_key("prod-a-y"));
    assert!(dir.path().join("prod-a-x.zip").exists());
    assert!(!dir.path().join("prod-a-y.zip").exists());
    assert_eq!(std::fs::read(dir.path().join("prod-a-z.zip")).unwrap(), archive_z);
    // Every successful entry is backed by a readable archive.
    for entry in lock.values().filter(|entry| entry.status == Status::Success) {
        let file = std::fs::File::open(dir.path().join(format!("{}.zip", entry.key()))).unwrap();
        zip::ZipArchive::new(file).unwrap();
    }

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.up_to_date, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.apps_per_env[&Environment::Prod], 2);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_keys(dir.path());

    let mut universe = Universe {
        orgs: serde_json::json!({"orgs": {
            "a": {"environments": ["production", "tt02"]},
            "b": {"environments": []},
        }}),
        ..Default::default()
    };
    universe.deployments.insert(
        "prod-a".to_owned(),
        serde_json::json!([{"release": "a-x", "version": "1.0.0"}]),
    );
    universe.deployments.insert(
        "tt02-a".to_owned(),
        serde_json::json!([{"release": "a-x", "version": "1.1.0"}]),
    );
    universe.releases.insert(
        "prod/a/x".to_owned(),
        serde_json::json!({"results": [
            {"tagName": "1.0.0", "targetCommitish": "sha-prod"},
            {"tagName": "1.1.0", "targetCommitish": "sha-tt02"},
        ]}),
    );
    universe
        .archives
        .insert("prod/a/x/sha-prod".to_owned(), zip_bytes(&[("a", "1")]));
    universe
        .archives
        .insert("prod/a/x/sha-tt02".to_owned(), zip_bytes(&[("b", "2")]));

    let universe = Arc::new(universe);
    let addr = serve(Arc::clone(&universe)).await;
    let base = format!("http://{addr}");

    let first = run_sync(options(dir.path(), &key_path), base.clone()).await;
    assert_eq!(first.updated, 2);
    // Only orgs with at least one environment tag count, and `a` spans two.
    assert_eq!(first.orgs, 1);
    assert_eq!(first.clusters, 2);

    let store = LockStore::new(dir.path());
    let lock_bytes = std::fs::read(store.path()).unwrap();
    let downloads: usize = universe.archive_hits.lock().unwrap().values().sum();

    let second = run_sync(options(dir.path(), &key_path), base).await;
    assert_eq!(second.updated, 0);
    assert_eq!(second.up_to_date, 2);

    // Byte-identical lock, and no archive was fetched again.
    assert_eq!(std::fs::read(store.path()).unwrap(), lock_bytes);
    assert_eq!(
        universe.archive_hits.lock().unwrap().values().sum::<usize>(),
        downloads
    );
}

#[tokio::test]
async fn unreachable_cluster_keeps_previous_apps() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_keys(dir.path());

    let store = LockStore::new(dir.path());
    let mut prev = BTreeMap::new();
    let entry = lock_entry(Environment::Tt02, "a", "x", "1", "sha-x", Status::Success);
    prev.insert(entry.key(), entry);
    store.write(&prev).unwrap();
    std::fs::write(dir.path().join("tt02-a-x.zip"), zip_bytes(&[("f", "x")])).unwrap();

    // The tt02 cluster exists but its deployments endpoint errors.
    let universe = Universe {
        orgs: serde_json::json!({"orgs": {"a": {"environments": ["tt02"]}}}),
        ..Default::default()
    };
    let addr = serve(Arc::new(universe)).await;
    let stats = run_sync(options(dir.path(), &key_path), format!("http://{addr}")).await;

    let lock = store.read().unwrap();
    assert_eq!(lock["tt02-a-x"], prev["tt02-a-x"]);
    assert!(dir.path().join("tt02-a-x.zip").exists());
    assert_eq!(stats.clusters_stale, vec!["tt02/a".to_owned()]);
    assert_eq!(stats.removed, 0);
}

#[tokio::test]
async fn failed_download_is_recorded_and_leaves_no_partial() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_keys(dir.path());

    let mut universe = Universe {
        orgs: serde_json::json!({"orgs": {"a": {"environments": ["production"]}}}),
        ..Default::default()
    };
    universe.deployments.insert(
        "prod-a".to_owned(),
        serde_json::json!([{"release": "a-x", "version": "3"}]),
    );
    universe.releases.insert(
        "prod/a/x".to_owned(),
        serde_json::json!({"results": [{"tagName": "3", "targetCommitish": "missing-sha"}]}),
    );
    // No archive registered: the download 404s.

    let addr = serve(Arc::new(universe)).await;
    let stats = run_sync(options(dir.path(), &key_path), format!("http://{addr}")).await;

    let lock = LockStore::new(dir.path()).read().unwrap();
    assert_eq!(lock["prod-a-x"].status, Status::Failed);
    assert_eq!(lock["prod-a-x"].commit_sha, "missing-sha");
    assert!(!dir.path().join("prod-a-x.zip").exists());
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.updated, 0);
}

#[tokio::test]
async fn prior_failure_is_skipped_unless_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_keys(dir.path());

    let store = LockStore::new(dir.path());
    let mut prev = BTreeMap::new();
    let entry = lock_entry(Environment::Prod, "a", "x", "2", "sha-x", Status::Failed);
    prev.insert(entry.key(), entry.clone());
    store.write(&prev).unwrap();

    let mut universe = Universe {
        orgs: serde_json::json!({"orgs": {"a": {"environments": ["production"]}}}),
        ..Default::default()
    };
    universe.deployments.insert(
        "prod-a".to_owned(),
        serde_json::json!([{"release": "a-x", "version": "2"}]),
    );
    universe
        .archives
        .insert("prod/a/x/sha-x".to_owned(), zip_bytes(&[("f", "x")]));

    let universe = Arc::new(universe);
    let addr = serve(Arc::clone(&universe)).await;
    let base = format!("http://{addr}");

    // Retry off: carried over, nothing downloaded, no release probe.
    let stats = run_sync(options(dir.path(), &key_path), base.clone()).await;
    assert_eq!(stats.skipped_prior_failure, 1);
    assert_eq!(store.read().unwrap()["prod-a-x"], entry);
    assert_eq!(universe.release_hits.lock().unwrap().len(), 0);

    // Retry on: the pinned revision downloads without a release probe.
    let mut retry_options = options(dir.path(), &key_path);
    retry_options.retry_failed = true;
    let stats = run_sync(retry_options, base).await;
    assert_eq!(stats.updated, 1);
    assert_eq!(universe.release_hits.lock().unwrap().len(), 0);
    let lock = store.read().unwrap();
    assert_eq!(lock["prod-a-x"].status, Status::Success);
    assert!(dir.path().join("prod-a-x.zip").exists());
}

#[tokio::test]
async fn missing_keys_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = Syncer::new(
        options(dir.path(), &dir.path().join("keys.json")),
        Arc::new(NullObserver),
        CancellationToken::new(),
    );
    assert!(result.is_err());
}
