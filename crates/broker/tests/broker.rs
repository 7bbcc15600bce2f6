use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::StreamBody;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use broker::{Broker, BrokerOptions};

#[derive(Default)]
struct ServerState {
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

async fn start_server(router: Router) -> SocketAddr {
    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
        .serve(router.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn quick_options() -> BrokerOptions {
    BrokerOptions {
        per_host: 4,
        max_attempts: 3,
        retry_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn per_host_concurrency_is_capped() {
    let state = Arc::new(ServerState::default());
    let router = Router::new()
        .route(
            "/slow",
            get(|State(state): State<Arc<ServerState>>| async move {
                let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                state.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                state.in_flight.fetch_sub(1, Ordering::SeqCst);
                axum::Json(serde_json::json!({"ok": true}))
            }),
        )
        .with_state(Arc::clone(&state));
    let addr = start_server(router).await;

    let broker = Broker::new(BrokerOptions {
        per_host: 2,
        ..quick_options()
    })
    .unwrap();

    let url = format!("http://{addr}/slow");
    let started = std::time::Instant::now();
    let fetches = (0..10).map(|_| broker.fetch_json::<serde_json::Value>(&url));
    let results = futures::future::join_all(fetches).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|result| result.is_ok()));
    // Ten 100ms requests through two permits take at least five rounds.
    assert!(elapsed >= Duration::from_millis(500), "took {elapsed:?}");
    assert!(state.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn transient_errors_are_retried_then_succeed() {
    let state = Arc::new(ServerState::default());
    let router = Router::new()
        .route(
            "/flaky",
            get(|State(state): State<Arc<ServerState>>| async move {
                if state.hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                } else {
                    Ok(axum::Json(serde_json::json!({"answer": 42})))
                }
            }),
        )
        .with_state(Arc::clone(&state));
    let addr = start_server(router).await;

    let broker = Broker::new(quick_options()).unwrap();
    let value: serde_json::Value = broker
        .fetch_json(&format!("http://{addr}/flaky"))
        .await
        .unwrap();
    assert_eq!(value["answer"], 42);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_become_permanent() {
    let router = Router::new().route(
        "/down",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let addr = start_server(router).await;

    let broker = Broker::new(quick_options()).unwrap();
    let err = broker
        .fetch_json::<serde_json::Value>(&format!("http://{addr}/down"))
        .await
        .unwrap_err();
    assert!(!err.is_transient(), "exhausted error must be permanent: {err}");
}

#[tokio::test]
async fn http_404_is_not_retried() {
    let state = Arc::new(ServerState::default());
    let router = Router::new()
        .route(
            "/gone",
            get(|State(state): State<Arc<ServerState>>| async move {
                state.hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        )
        .with_state(Arc::clone(&state));
    let addr = start_server(router).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("gone.zip");
    let broker = Broker::new(quick_options()).unwrap();
    let err = broker
        .download_file(
            &format!("http://{addr}/gone"),
            &dest,
            "t0ken",
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    assert!(!dest.exists());
}

#[tokio::test]
async fn download_streams_with_token_and_progress() {
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let router = Router::new().route(
        "/archive.zip",
        get(move |headers: HeaderMap| {
            let payload = payload.clone();
            async move {
                assert_eq!(
                    headers.get("authorization").and_then(|v| v.to_str().ok()),
                    Some("token s3cr3t")
                );
                payload
            }
        }),
    );
    let addr = start_server(router).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("archive.zip");
    let broker = Broker::new(quick_options()).unwrap();

    let expected_len = expected.len();
    let last_progress = Arc::new(AtomicUsize::new(0));
    let progress = {
        let last_progress = Arc::clone(&last_progress);
        move |completed: u64, total: Option<u64>| {
            assert_eq!(total, Some(expected_len as u64));
            last_progress.store(completed as usize, Ordering::SeqCst);
        }
    };
    broker
        .download_file(
            &format!("http://{addr}/archive.zip"),
            &dest,
            "s3cr3t",
            Some(&progress),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), expected);
    assert_eq!(last_progress.load(Ordering::SeqCst), expected_len);
}

#[tokio::test]
async fn cancellation_removes_the_partial_file() {
    let router = Router::new().route(
        "/stall.zip",
        get(|| async {
            let chunks = futures::stream::unfold(0u32, |i| async move {
                if i == 0 {
                    Some((Ok::<_, std::io::Error>(vec![0u8; 4096]), 1))
                } else {
                    // First chunk delivered, then stall until the client goes away.
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    None
                }
            });
            StreamBody::new(chunks)
        }),
    );
    let addr = start_server(router).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("stall.zip");
    let broker = Broker::new(quick_options()).unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = broker
        .download_file(
            &format!("http://{addr}/stall.zip"),
            &dest,
            "t0ken",
            None,
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, broker::Error::Cancelled { .. }));
    assert!(!dest.exists());
}
