//! Tabular data source contracts + CSV-backed implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use mrl_core::Record;
use mrl_storage::{content_sha256, FetchError, HttpFetcher, SnapshotStore};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "mrl-sources";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetching {dataset}: {source}")]
    Fetch {
        dataset: String,
        #[source]
        source: FetchError,
    },
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {dataset} csv: {source}")]
    Csv {
        dataset: String,
        #[source]
        source: csv::Error,
    },
    #[error("storing {dataset} snapshot: {source}")]
    Snapshot {
        dataset: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Where one dataset came from and exactly which bytes were read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInput {
    pub dataset: String,
    pub location: String,
    /// `None` for rows that never existed as bytes (in-memory sources).
    pub sha256: Option<String>,
    pub byte_size: Option<usize>,
    pub rows: usize,
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub input: DatasetInput,
    pub records: Vec<Record>,
}

/// Anything that yields the rows of one dataset.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<LoadedDataset, SourceError>;
}

/// Decode CSV text into records keyed by the header row.
///
/// Short rows produce records without the trailing fields; extra cells are dropped.
pub fn decode_csv_records(dataset: &str, bytes: &[u8]) -> Result<Vec<Record>, SourceError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let csv_err = |source| SourceError::Csv {
        dataset: dataset.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers().map_err(csv_err)?.clone();

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_err)?;
        out.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .collect(),
        );
    }
    Ok(out)
}

fn decode_body(dataset: &str, location: &str, body: &[u8]) -> Result<LoadedDataset, SourceError> {
    let records = decode_csv_records(dataset, body)?;
    Ok(LoadedDataset {
        input: DatasetInput {
            dataset: dataset.to_string(),
            location: location.to_string(),
            sha256: Some(content_sha256(body)),
            byte_size: Some(body.len()),
            rows: records.len(),
            snapshot: None,
        },
        records,
    })
}

pub fn is_http_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[derive(Debug, Clone)]
pub struct HttpCsvSource {
    name: String,
    url: String,
    http: HttpFetcher,
    snapshots: Option<SnapshotStore>,
}

impl HttpCsvSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            http,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DataSource for HttpCsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<LoadedDataset, SourceError> {
        let resp = self
            .http
            .fetch_bytes(&self.name, &self.url)
            .await
            .map_err(|source| SourceError::Fetch {
                dataset: self.name.clone(),
                source,
            })?;

        // Kept before decoding so a body that fails to parse can still be inspected.
        let snapshot = match &self.snapshots {
            Some(store) => {
                let kept = store
                    .keep(&self.name, &resp.body)
                    .await
                    .map_err(|source| SourceError::Snapshot {
                        dataset: self.name.clone(),
                        source,
                    })?;
                info!(
                    dataset = %self.name,
                    path = %kept.path.display(),
                    reused = kept.reused,
                    "kept dataset snapshot"
                );
                Some(kept.path)
            }
            None => None,
        };

        let mut loaded = decode_body(&self.name, &self.url, &resp.body)?;
        loaded.input.snapshot = snapshot;
        Ok(loaded)
    }
}

#[derive(Debug, Clone)]
pub struct FileCsvSource {
    name: String,
    path: PathBuf,
}

impl FileCsvSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl DataSource for FileCsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<LoadedDataset, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        decode_body(&self.name, &self.path.display().to_string(), &bytes)
    }
}

/// Fixed in-memory rows, for tests and callers that already hold the data.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<LoadedDataset, SourceError> {
        Ok(LoadedDataset {
            input: DatasetInput {
                dataset: self.name.clone(),
                location: "memory".to_string(),
                sha256: None,
                byte_size: None,
                rows: self.records.len(),
                snapshot: None,
            },
            records: self.records.clone(),
        })
    }
}

/// Pick an HTTP or file source depending on what `location` looks like.
pub fn source_for_location(
    name: &str,
    location: &str,
    http: &HttpFetcher,
    snapshots: Option<&SnapshotStore>,
) -> Box<dyn DataSource> {
    if is_http_location(location) {
        let mut source = HttpCsvSource::new(name, location, http.clone());
        if let Some(store) = snapshots {
            source = source.with_snapshots(store.clone());
        }
        Box::new(source)
    } else {
        Box::new(FileCsvSource::new(name, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrl_storage::HttpClientConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const MISSIONS_CSV: &str = "id,title,description\nm1,Customer Obsession,Focus on customers\nm2,Tax,File W-2\n";

    /// Answer a single request on a loopback port with a canned status and body.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.expect("read");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/csv\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/missions.csv")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).expect("client")
    }

    #[test]
    fn decodes_header_keyed_rows() {
        let text = "id,title,description\nm1,Customer Obsession,\"Focus, on customers\"\n";
        let rows = decode_csv_records("missions", text.as_bytes()).expect("decode");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "m1");
        assert_eq!(rows[0]["description"], "Focus, on customers");
    }

    #[test]
    fn bom_and_short_rows_are_tolerated() {
        let text = "\u{feff}id,title,resource_id\nm1,Only title\n";
        let rows = decode_csv_records("missions", text.as_bytes()).expect("decode");
        assert_eq!(rows[0]["id"], "m1");
        assert!(!rows[0].contains_key("resource_id"));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let err = decode_csv_records("resources", b"id,title\nr1,\xff\xfe\n").unwrap_err();
        assert!(matches!(err, SourceError::Csv { ref dataset, .. } if dataset == "resources"));
    }

    #[tokio::test]
    async fn http_body_decodes_to_records() {
        let url = serve_once("200 OK", MISSIONS_CSV).await;
        let loaded = HttpCsvSource::new("missions", url.clone(), fetcher())
            .load()
            .await
            .expect("load");

        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0]["title"], "Customer Obsession");
        assert_eq!(loaded.input.location, url);
        assert_eq!(loaded.input.rows, 2);
        assert_eq!(loaded.input.byte_size, Some(MISSIONS_CSV.len()));
        assert_eq!(
            loaded.input.sha256.as_deref(),
            Some(content_sha256(MISSIONS_CSV.as_bytes()).as_str())
        );
        assert_eq!(loaded.input.snapshot, None);
    }

    #[tokio::test]
    async fn http_body_is_snapshotted_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = serve_once("200 OK", MISSIONS_CSV).await;
        let loaded = HttpCsvSource::new("missions", url, fetcher())
            .with_snapshots(SnapshotStore::new(dir.path()))
            .load()
            .await
            .expect("load");

        let snapshot = loaded.input.snapshot.expect("snapshot path");
        assert_eq!(std::fs::read_to_string(&snapshot).expect("read"), MISSIONS_CSV);
        let kept = std::fs::read_dir(dir.path().join("missions")).expect("list").count();
        assert_eq!(kept, 1);
        assert_eq!(loaded.records.len(), 2);
    }

    #[tokio::test]
    async fn http_error_status_is_fatal() {
        let url = serve_once("500 Internal Server Error", "").await;
        let err = HttpCsvSource::new("missions", url, fetcher())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SourceError::Fetch {
                ref dataset,
                source: FetchError::HttpStatus { status: 500, .. },
            } if dataset == "missions"
        ));
    }

    #[tokio::test]
    async fn file_source_reads_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resources.csv");
        std::fs::write(&path, "id,title\nr1,Guide\nr2,Video\n").expect("write");

        let source = FileCsvSource::new("resources", &path);
        let loaded = source.load().await.expect("load");
        assert_eq!(source.name(), "resources");
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1]["title"], "Video");
        assert_eq!(loaded.input.location, path.display().to_string());
        assert!(loaded.input.sha256.is_some());
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let source = FileCsvSource::new("missions", "/definitely/not/here.csv");
        let err = source.load().await.unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.csv"));
    }

    #[test]
    fn location_routing() {
        assert!(is_http_location("https://example.com/a.csv"));
        assert!(!is_http_location("fixtures/missions.csv"));
        let source = source_for_location("missions", "fixtures/missions.csv", &fetcher(), None);
        assert_eq!(source.name(), "missions");
    }
}
