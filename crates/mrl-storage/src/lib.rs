//! Dataset snapshots + HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mrl-storage";

/// Lower-case hex sha256 of `bytes`.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A dataset body kept on disk under its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSnapshot {
    pub sha256: String,
    pub path: PathBuf,
    pub byte_size: usize,
    /// An identical body was already on disk from an earlier run.
    pub reused: bool,
}

/// Keeps every distinct body of a dataset as `<root>/<dataset>/<sha256>.csv`,
/// so a run report can name the exact input it matched against.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, dataset: &str, sha256: &str) -> PathBuf {
        self.root.join(dataset).join(format!("{sha256}.csv"))
    }

    pub async fn keep(&self, dataset: &str, bytes: &[u8]) -> anyhow::Result<DatasetSnapshot> {
        let sha256 = content_sha256(bytes);
        let path = self.snapshot_path(dataset, &sha256);
        let dir = self.root.join(dataset);

        let reused = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking snapshot {}", path.display()))?;
        if !reused {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
            // A hash-named file is only ever created by rename, so it is always complete.
            let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("creating {}", temp_path.display()))?;
            file.write_all(bytes)
                .await
                .with_context(|| format!("writing {}", temp_path.display()))?;
            file.flush().await?;
            drop(file);
            if let Err(err) = fs::rename(&temp_path, &path).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(err).with_context(|| format!("renaming snapshot into {}", path.display()));
            }
        }

        debug!(dataset, sha256 = %sha256, reused, "dataset snapshot kept");
        Ok(DatasetSnapshot {
            sha256,
            path,
            byte_size: bytes.len(),
            reused,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-shot GET client. Failures are returned as-is; there is no retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
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
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, dataset: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", dataset, url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            debug!(bytes = body.len(), "fetched body");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
