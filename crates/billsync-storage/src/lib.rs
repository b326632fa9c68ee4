//! Atomic JSON persistence for the mirrored dataset + throttled HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub mod dataset;
pub mod manifest;

pub use dataset::{BillsDocument, DataDir, DatasetMetadata, DatasetStats, SyncLog, SyncLogEntry, SYNC_LOG_CAP};
pub use manifest::{Manifest, ManifestEntry, ManifestStore};

pub const CRATE_NAME: &str = "billsync-storage";

/// Serialize `value` as pretty JSON and move it into place with a same-directory temp-file rename.
///
/// Readers never observe a partially written file.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    debug!(path = %path.display(), bytes = bytes.len(), "wrote json file");
    Ok(())
}

/// Read and parse a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Minimum delay between the start of successive upstream calls.
    pub min_interval: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            min_interval: Duration::from_millis(100),
        }
    }
}

/// Politeness throttle: keeps at least `min_interval` between the end of one call and the
/// start of the next.
#[derive(Debug)]
pub struct PoliteThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PoliteThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// Marks the end of the call admitted by the last [`wait`](Self::wait).
    pub async fn finish(&self) {
        *self.last_call.lock().await = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Sequential upstream client. One attempt per call; failed calls are left to the next run.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    throttle: PoliteThrottle,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            throttle: PoliteThrottle::new(config.min_interval),
        })
    }

    /// POST a SOAP 1.1 envelope and return the raw response body.
    pub async fn post_soap(
        &self,
        url: &str,
        soap_action: &str,
        envelope: String,
    ) -> Result<FetchedResponse, FetchError> {
        self.throttle.wait().await;

        let span = info_span!("http_fetch", url, soap_action);
        let result = async {
            let resp = self
                .client
                .post(url)
                .header("Content-Type", "text/xml; charset=utf-8")
                .header("SOAPAction", format!("\"{soap_action}\""))
                .body(envelope)
                .send()
                .await?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await;
        self.throttle.finish().await;
        result
    }
}
