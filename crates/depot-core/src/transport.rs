//! Byte transport: moves the bytes at a URL into a sink.
//!
//! `file:` URLs take a direct copy loop; everything else goes through HTTP.
//! Cancellation is observed before a transfer starts, not during it.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use async_trait::async_trait;
use depot_schema::{Status, StatusCode};
use futures::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

/// User Agent string for transport requests
pub const USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// Buffer size of the local copy loop.
pub const LOCAL_BUFFER_SIZE: usize = 16 * 1024;

/// Progress callback: bytes transferred so far and the expected total.
pub type Progress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Moves bytes from a location into a sink.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Copy the bytes at `source` into `sink`.
    ///
    /// Never fails with an `Err`: every outcome, including cancellation and
    /// a missing source, is a [`Status`].
    async fn download(
        &self,
        source: &Url,
        sink: &mut (dyn Write + Send),
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Status;

    /// Fetch the whole content of `source` into memory.
    ///
    /// # Errors
    ///
    /// The failure status of the underlying download.
    async fn fetch(&self, source: &Url, cancel: &CancellationToken) -> Result<Vec<u8>, Status> {
        let mut buf = Vec::new();
        let status = self.download(source, &mut buf, &|_, _| {}, cancel).await;
        if status.is_success() {
            Ok(buf)
        } else {
            Err(status)
        }
    }
}

/// Default transport: local fast path plus HTTP(S) via `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    client: Client,
}

impl DefaultTransport {
    /// Transport over a shared HTTP client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download_http(
        &self,
        source: &Url,
        sink: &mut (dyn Write + Send),
        progress: Progress<'_>,
    ) -> Status {
        let response = match self
            .client
            .get(source.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Status::error(StatusCode::Transport, format!("Request to {source} failed: {e}"));
            }
        };

        let http_status = response.status();
        if http_status == reqwest::StatusCode::NOT_FOUND {
            return Status::error(
                StatusCode::ArtifactNotFound,
                format!("Artifact not found: {source}"),
            );
        }
        if !http_status.is_success() {
            return Status::error(
                StatusCode::Transport,
                format!("Unexpected HTTP status {http_status} from {source}"),
            );
        }

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut transferred: u64 = 0;
        progress(0, total);

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    return Status::error(
                        StatusCode::Transport,
                        format!("Transfer from {source} interrupted: {e}"),
                    );
                }
            };
            if let Err(e) = sink.write_all(&chunk) {
                return Status::error(StatusCode::Io, format!("Failed to write {source}: {e}"));
            }
            transferred += chunk.len() as u64;
            progress(transferred, total);
        }
        Status::ok()
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn download(
        &self,
        source: &Url,
        sink: &mut (dyn Write + Send),
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Status {
        if cancel.is_cancelled() {
            return Status::cancel();
        }
        if source.scheme() == "file" {
            return match source.to_file_path() {
                Ok(path) => copy_local(&path, sink, progress),
                Err(()) => Status::error(
                    StatusCode::Transport,
                    format!("Not a local path: {source}"),
                ),
            };
        }
        self.download_http(source, sink, progress).await
    }
}

/// Same-machine copy with a fixed buffer, reporting progress per iteration.
pub fn copy_local(path: &Path, sink: &mut (dyn Write + Send), progress: Progress<'_>) -> Status {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Status::error(
                StatusCode::ArtifactNotFound,
                format!("Artifact not found: {}", path.display()),
            );
        }
        Err(e) => {
            return Status::error(
                StatusCode::Transport,
                format!("Failed to open {}: {e}", path.display()),
            );
        }
    };
    let total = file.metadata().ok().map(|m| m.len());
    let iterations = total.map(|t| t.div_ceil(LOCAL_BUFFER_SIZE as u64));
    tracing::trace!(path = %path.display(), ?iterations, "Local copy");

    let mut buf = vec![0u8; LOCAL_BUFFER_SIZE];
    let mut transferred: u64 = 0;
    progress(0, total);
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Status::error(
                    StatusCode::Transport,
                    format!("Failed to read {}: {e}", path.display()),
                );
            }
        };
        if let Err(e) = sink.write_all(&buf[..n]) {
            return Status::error(StatusCode::Io, format!("Failed to write: {e}"));
        }
        transferred += n as u64;
        progress(transferred, total);
    }
    Status::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_copy_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let data = vec![7u8; LOCAL_BUFFER_SIZE * 2 + 5];
        std::fs::write(&path, &data).unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let progress = |_: u64, _: Option<u64>| {
            calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        };
        let mut out = Vec::new();
        let status = DefaultTransport::default()
            .download(&url, &mut out, &progress, &CancellationToken::new())
            .await;
        assert!(status.is_ok());
        assert_eq!(out, data);
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing")).unwrap();
        let status = DefaultTransport::default()
            .download(&url, &mut Vec::new(), &|_, _| {}, &CancellationToken::new())
            .await;
        assert_eq!(status.code(), StatusCode::ArtifactNotFound);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let url = Url::parse("http://127.0.0.1:1/never").unwrap();
        let status = DefaultTransport::default()
            .download(&url, &mut Vec::new(), &|_, _| {}, &cancel)
            .await;
        assert!(status.is_cancel());
    }

    #[tokio::test]
    async fn http_download_and_404() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/plugins/foo.jar")
            .with_status(200)
            .with_body("jar bytes")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/plugins/bar.jar")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/plugins/baz.jar")
            .with_status(500)
            .create_async()
            .await;

        let transport = DefaultTransport::default();
        let cancel = CancellationToken::new();
        let base = Url::parse(&server.url()).unwrap();

        let bytes = transport
            .fetch(&base.join("plugins/foo.jar").unwrap(), &cancel)
            .await
            .unwrap();
        assert_eq!(bytes, b"jar bytes");

        let err = transport
            .fetch(&base.join("plugins/bar.jar").unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::ArtifactNotFound);

        let err = transport
            .fetch(&base.join("plugins/baz.jar").unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Transport);
    }
}
