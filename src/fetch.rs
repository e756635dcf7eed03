//! Content download: streams a resolved file into the work directory.

use crate::error::BundleError;
use crate::types::{Descriptor, MaterializedFile, PipelineConfig, PLACEHOLDER_NAME};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, warn};

/// Write granularity for streamed downloads (1 MiB).
pub const WRITE_CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum number of ` (n)` suffixes tried when a filename is taken.
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Materializes a descriptor's content under a destination directory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> Result<MaterializedFile, BundleError>;
}

/// Makes a page-provided name safe to use as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        PLACEHOLDER_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Creates a new, empty file for `name` in `dir`, adding ` (1)`, ` (2)`, ...
/// before the extension until the name is free.
///
/// Creation uses `create_new`, so two concurrent downloads with the same name
/// can never end up writing the same file.
pub async fn reserve_destination(dir: &Path, name: &str) -> Result<PathBuf, BundleError> {
    let name = sanitize_file_name(name);
    let original = Path::new(&name);
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(PLACEHOLDER_NAME)
        .to_string();
    let extension = original.extension().and_then(|e| e.to_str());

    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = match (attempt, extension) {
            (0, _) => name.clone(),
            (n, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            (n, None) => format!("{} ({})", stem, n),
        };
        let path = dir.join(candidate);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(BundleError::IoError(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "Could not find a free name for {} after {} attempts",
            name, MAX_RENAME_ATTEMPTS
        ),
    )))
}

/// A failed download attempt and how far it got.
#[derive(Debug)]
struct StreamFailure {
    written: u64,
    source: BundleError,
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} bytes)", self.source, self.written)
    }
}

/// Flushes what was buffered before a failed attempt and returns the number
/// of bytes that actually reached `path`.
async fn settle_partial(
    writer: &mut BufWriter<tokio::fs::File>,
    path: &Path,
    buffered: u64,
) -> u64 {
    if let Err(e) = writer.flush().await {
        warn!("Failed to flush partial download {}: {}", path.display(), e);
    }
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!("Failed to stat partial download {}: {}", path.display(), e);
            buffered
        }
    }
}

/// Streams `url` into `path`, truncating whatever the file held before.
async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<u64, StreamFailure> {
    let at = |written: u64| move |e: BundleError| StreamFailure { written, source: e };

    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| at(0)(e.into()))?;
    let mut writer = BufWriter::with_capacity(WRITE_CHUNK_SIZE, file);

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| at(0)(e.into()))?;
    let content_length = response.content_length();

    let mut written = 0u64;
    let mut byte_stream = response.bytes_stream();
    while let Some(piece) = byte_stream.next().await {
        let chunk = match piece {
            Ok(chunk) => chunk,
            Err(e) => {
                let on_disk = settle_partial(&mut writer, path, written).await;
                return Err(at(on_disk)(e.into()));
            }
        };
        if let Err(e) = writer.write_all(&chunk).await {
            let on_disk = settle_partial(&mut writer, path, written).await;
            return Err(at(on_disk)(e.into()));
        }
        written += chunk.len() as u64;
    }
    writer.flush().await.map_err(|e| at(written)(e.into()))?;

    if let Some(expected) = content_length {
        if written != expected {
            return Err(at(written)(BundleError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "size mismatch for {}: expected {} bytes, got {} bytes",
                    path.display(),
                    expected,
                    written
                ),
            ))));
        }
    } else {
        debug!("No Content-Length for {}, trusting stream end", url);
    }

    Ok(written)
}

/// Live fetcher: HTTP GET streamed to disk, with optional retries for
/// connection and timeout errors.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: usize,
    retry_interval: Duration,
}

impl HttpFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, BundleError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.resolve_timeout)
            .build()?;
        Ok(Self {
            client,
            retries: config.fetch_retries,
            retry_interval: config.fetch_retry_interval,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> Result<MaterializedFile, BundleError> {
        let path = reserve_destination(destination_dir, &descriptor.name)
            .await
            .map_err(|e| BundleError::Fetch {
                location: descriptor.location.clone(),
                partial_bytes: 0,
                reason: e.to_string(),
            })?;
        let file_display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(descriptor.name.as_str())
            .to_string();

        info!("⬇️  Downloading {} -> {}", descriptor.location, file_display_name);

        let interval_ms = u64::try_from(self.retry_interval.as_millis()).unwrap_or(u64::MAX);
        let retry_strategy =
            tokio_retry2::strategy::FixedInterval::from_millis(interval_ms).take(self.retries);

        let result = Retry::spawn(retry_strategy, || {
            let client = self.client.clone();
            let location = descriptor.location.clone();
            let path = path.clone();

            async move {
                match stream_to_file(&client, &location, &path).await {
                    Ok(written) => Ok(written),
                    Err(failure) if failure.source.is_transient() => {
                        warn!(
                            "Failed to download {} due to error: {}",
                            location, failure.source
                        );
                        RetryError::to_transient(failure)
                    }
                    Err(failure) => RetryError::to_permanent(failure),
                }
            }
        })
        .await;

        match result {
            Ok(size) => {
                info!("✅ Downloaded {} ({} bytes)", file_display_name, size);
                Ok(MaterializedFile { path, size })
            }
            Err(failure) => Err(BundleError::Fetch {
                location: descriptor.location.clone(),
                partial_bytes: failure.written,
                reason: failure.source.to_string(),
            }),
        }
    }
}

/// Offline fetcher: creates a sparse file of exactly the declared size.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher;

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> Result<MaterializedFile, BundleError> {
        let failure = |e: BundleError| BundleError::Fetch {
            location: descriptor.location.clone(),
            partial_bytes: 0,
            reason: e.to_string(),
        };

        let path = reserve_destination(destination_dir, &descriptor.name)
            .await
            .map_err(failure)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| failure(e.into()))?;
        file.set_len(descriptor.size)
            .await
            .map_err(|e| failure(e.into()))?;
        let size = file.metadata().await.map_err(|e| failure(e.into()))?.len();

        debug!("Materialized fake {} ({} bytes)", path.display(), size);
        Ok(MaterializedFile { path, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(name: &str, location: &str, size: u64) -> Descriptor {
        Descriptor {
            name: name.to_string(),
            size,
            location: location.to_string(),
            kind: ContentKind::Generic,
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("movie.mkv"), "movie.mkv");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("a\\b\nc"), "a_b_c");
        assert_eq!(sanitize_file_name("  "), PLACEHOLDER_NAME);
        assert_eq!(sanitize_file_name(".."), PLACEHOLDER_NAME);
    }

    #[tokio::test]
    async fn test_reserve_destination_adds_suffix() {
        let temp_dir = TempDir::new().unwrap();

        let first = reserve_destination(temp_dir.path(), "clip.mp4").await.unwrap();
        let second = reserve_destination(temp_dir.path(), "clip.mp4").await.unwrap();
        let third = reserve_destination(temp_dir.path(), "clip.mp4").await.unwrap();

        assert_eq!(first, temp_dir.path().join("clip.mp4"));
        assert_eq!(second, temp_dir.path().join("clip (1).mp4"));
        assert_eq!(third, temp_dir.path().join("clip (2).mp4"));

        let bare = reserve_destination(temp_dir.path(), "README").await.unwrap();
        let bare_again = reserve_destination(temp_dir.path(), "README").await.unwrap();
        assert_eq!(bare, temp_dir.path().join("README"));
        assert_eq!(bare_again, temp_dir.path().join("README (1)"));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_collide() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dir = dir.clone();
                tokio::spawn(async move { reserve_destination(&dir, "same.bin").await })
            })
            .collect();

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);
    }

    #[tokio::test]
    async fn test_http_fetcher_streams_body_to_disk() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..(3 * WRITE_CHUNK_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/files/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(&PipelineConfig::default()).unwrap();
        // Declared size is deliberately wrong; the written size wins.
        let descriptor = descriptor("big.bin", &format!("{}/files/big.bin", server.uri()), 5);

        let file = fetcher.fetch(&descriptor, temp_dir.path()).await.unwrap();

        assert_eq!(file.path, temp_dir.path().join("big.bin"));
        assert_eq!(file.size, body.len() as u64);
        assert_eq!(std::fs::read(&file.path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_http_fetcher_error_status_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            fetch_retries: 3,
            fetch_retry_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let descriptor = descriptor("x.bin", &format!("{}/x.bin", server.uri()), 0);

        let err = fetcher.fetch(&descriptor, temp_dir.path()).await.unwrap_err();
        match err {
            BundleError::Fetch { partial_bytes, .. } => assert_eq!(partial_bytes, 0),
            other => panic!("unexpected error: {other:?}"),
        }
        // The reserved file stays behind, empty.
        assert!(temp_dir.path().join("x.bin").exists());
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused_is_fetch_failure() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            fetch_retries: 1,
            fetch_retry_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let descriptor = descriptor("x.bin", "http://127.0.0.1:1/x.bin", 0);

        assert!(matches!(
            fetcher.fetch(&descriptor, temp_dir.path()).await,
            Err(BundleError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_fetcher_accepts_oversized_retry_interval() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            fetch_retries: 0,
            fetch_retry_interval: Duration::MAX,
            ..PipelineConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.retry_interval, Duration::MAX);

        let descriptor = descriptor("x.bin", "http://127.0.0.1:1/x.bin", 0);
        assert!(matches!(
            fetcher.fetch(&descriptor, temp_dir.path()).await,
            Err(BundleError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_fetcher_reports_bytes_written_before_drop() {
        // Announces 1000 bytes, sends 400, then hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(&[7u8; 400]).await.unwrap();
            socket.flush().await.unwrap();
        });

        let temp_dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(&PipelineConfig::default()).unwrap();
        let descriptor = descriptor("cut.bin", &format!("http://{}/cut.bin", addr), 1000);

        let err = fetcher.fetch(&descriptor, temp_dir.path()).await.unwrap_err();
        server.await.unwrap();

        match err {
            BundleError::Fetch { partial_bytes, .. } => assert_eq!(partial_bytes, 400),
            other => panic!("unexpected error: {other:?}"),
        }
        let on_disk = std::fs::read(temp_dir.path().join("cut.bin")).unwrap();
        assert_eq!(on_disk, vec![7u8; 400]);
    }

    #[tokio::test]
    async fn test_fake_fetcher_writes_declared_size() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = descriptor("fake.mp4", "https://t.example/fake.mp4", 4096);

        let first = FakeFetcher.fetch(&descriptor, temp_dir.path()).await.unwrap();
        let second = FakeFetcher.fetch(&descriptor, temp_dir.path()).await.unwrap();

        assert_eq!(first.size, 4096);
        assert_eq!(std::fs::metadata(&first.path).unwrap().len(), 4096);
        assert_ne!(first.path, second.path);
    }
}
