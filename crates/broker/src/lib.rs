//! Bounded request broker.
//!
//! All remote traffic funnels through a [`Broker`]: a shared reqwest
//! client (HTTP/2 keep-alive, bounded connection pool, redirect-following)
//! fronted by one counting semaphore per hostname. Callers may fan out an
//! unbounded number of logical tasks; the per-host permits decide how many
//! requests are actually in flight.
//!
//! Transient failures (timeouts, connection errors, 5xx) are retried a
//! bounded number of times with a fixed delay, then reported as permanent.
//! HTTP 404 is never retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Worth retrying; reported only once attempts are exhausted.
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },
    /// Not worth retrying: 404, other 4xx, malformed payloads, bad URLs.
    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },
    #[error("i/o failure writing {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled while fetching {url}")]
    Cancelled { url: String },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Reclassify after the retry budget is spent.
    fn exhausted(self, attempts: u32) -> Error {
        match self {
            Error::Transient { url, reason } => Error::Permanent {
                url,
                reason: format!("{reason} (after {attempts} attempts)"),
            },
            other => other,
        }
    }
}

fn classify_request_error(url: &str, err: reqwest::Error) -> Error {
    let url = url.to_owned();
    if err.is_timeout() || err.is_connect() {
        return Error::Transient {
            url,
            reason: err.to_string(),
        };
    }
    if let Some(status) = err.status() {
        return classify_status(&url, status);
    }
    // Body/stream interruptions are worth another attempt; anything else
    // (builder misuse, decode) is not going to improve.
    if err.is_body() || err.is_request() {
        Error::Transient {
            url,
            reason: err.to_string(),
        }
    } else {
        Error::Permanent {
            url,
            reason: err.to_string(),
        }
    }
}

fn classify_status(url: &str, status: reqwest::StatusCode) -> Error {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::Transient {
            url: url.to_owned(),
            reason: format!("status {status}"),
        }
    } else {
        Error::Permanent {
            url: url.to_owned(),
            reason: format!("status {status}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Maximum concurrent requests per hostname.
    pub per_host: usize,
    /// Total attempts per request (first try included).
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            per_host: 4,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Per-hostname concurrency limiting over a pooled HTTP client.
pub struct Broker {
    client: reqwest::Client,
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Semaphore>>>,
    options: BrokerOptions,
}

impl Broker {
    pub fn new(options: BrokerOptions) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(None)
            .build()?;
        Ok(Broker {
            client,
            hosts: Mutex::new(HashMap::new()),
            options,
        })
    }

    /// Acquire the in-flight permit for the URL's hostname.
    async fn permit(
        &self,
        url: &str,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, Error> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned))
            .ok_or_else(|| Error::Permanent {
                url: url.to_owned(),
                reason: "URL has no hostname".to_owned(),
            })?;
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap();
            Arc::clone(hosts.entry(host).or_insert_with(|| {
                Arc::new(tokio::sync::Semaphore::new(self.options.per_host))
            }))
        };
        Ok(semaphore
            .acquire_owned()
            .await
            .expect("host semaphore is never closed"))
    }

    /// GET a JSON document. Retries transient failures, then fails permanent.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, Error> {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self.permit(url).await?;
                self.try_fetch_json(url).await
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.options.max_attempts => {
                    tracing::debug!(url, attempt, error = %err, "retrying fetch_json");
                    tokio::time::sleep(self.options.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.exhausted(attempt)),
            }
        }
    }

    async fn try_fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| classify_request_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }
        response.json().await.map_err(|err| Error::Permanent {
            url: url.to_owned(),
            reason: format!("malformed JSON response: {err}"),
        })
    }

    /// Stream a file to `dest`, reporting `(completed, total)` progress.
    ///
    /// The bearer token is attached as `Authorization: token <bearer>`.
    /// On any failure — including cancellation — the partial file is
    /// removed before the error is returned.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        token: &str,
        on_progress: Option<&(dyn Fn(u64, Option<u64>) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self.permit(url).await?;
                self.try_download(url, dest, token, on_progress, cancel).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    remove_partial(dest).await;
                    match err {
                        err if err.is_transient() && attempt < self.options.max_attempts => {
                            tracing::debug!(url, attempt, error = %err, "retrying download");
                            tokio::time::sleep(self.options.retry_delay).await;
                            attempt += 1;
                        }
                        err => return Err(err.exhausted(attempt)),
                    }
                }
            }
        }
    }

    async fn try_download(
        &self,
        url: &str,
        dest: &Path,
        token: &str,
        on_progress: Option<&(dyn Fn(u64, Option<u64>) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("token {token}"))
            .send()
            .await
            .map_err(|err| classify_request_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| Error::Io {
                path: dest.to_owned(),
                source,
            })?;
        let mut completed = 0u64;
        if let Some(on_progress) = on_progress {
            on_progress(completed, total);
        }

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled { url: url.to_owned() });
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|err| classify_request_error(url, err))?;
            file.write_all(&chunk).await.map_err(|source| Error::Io {
                path: dest.to_owned(),
                source,
            })?;
            completed += chunk.len() as u64;
            if let Some(on_progress) = on_progress {
                on_progress(completed, total);
            }
        }
        file.flush().await.map_err(|source| Error::Io {
            path: dest.to_owned(),
            source,
        })?;
        Ok(())
    }
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %dest.display(), error = %err, "failed to remove partial download");
        }
    }
}
