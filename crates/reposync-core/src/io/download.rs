//! Index retrieval with conditional requests and streaming SHA256 hashing.
//!
//! The synchronizer asks an [`IndexFetcher`] for a repository's index and
//! consumes the body as a byte stream, so parsing can start before the whole
//! document has arrived.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;
use reposync_schema::Repository;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[cfg(feature = "network")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of a freshly fetched index.
pub struct IndexBody {
    /// Raw document bytes, in order.
    pub stream: BoxStream<'static, io::Result<Bytes>>,
    /// Declared length, when the server sent one.
    pub total: Option<u64>,
    /// Entity tag to send on the next request.
    pub etag: Option<String>,
}

impl std::fmt::Debug for IndexBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBody")
            .field("total", &self.total)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Result of asking for a repository's index.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The server confirmed the stored entity tag is current.
    NotModified,
    /// A new body is available.
    Fetched(IndexBody),
}

/// The download collaborator.
///
/// Retry and backoff are the implementation's business; the synchronizer
/// treats any error as a failure of that repository.
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    /// Fetch the index of `repo`, conditional on its stored entity tag.
    async fn fetch(&self, repo: &Repository) -> Result<FetchOutcome, DownloadError>;
}

#[async_trait]
impl<T: IndexFetcher + ?Sized> IndexFetcher for std::sync::Arc<T> {
    async fn fetch(&self, repo: &Repository) -> Result<FetchOutcome, DownloadError> {
        (**self).fetch(repo).await
    }
}

/// Fetches `<address>/index.xml` over HTTP(S).
#[cfg(feature = "network")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    /// Wrap an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl IndexFetcher for HttpFetcher {
    async fn fetch(&self, repo: &Repository) -> Result<FetchOutcome, DownloadError> {
        use futures::TryStreamExt;
        use reqwest::{StatusCode, header};

        let url = crate::paths::index_url(&repo.address);
        let mut request = self
            .client
            .get(&url)
            .header(header::USER_AGENT, crate::USER_AGENT);
        if let Some(etag) = &repo.etag {
            request = request.header(header::IF_NONE_MATCH, etag.as_str());
        }

        tracing::debug!(%url, etag = ?repo.etag, "requesting index");
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let total = response.content_length();
        let stream = response.bytes_stream().map_err(io::Error::other);

        Ok(FetchOutcome::Fetched(IndexBody {
            stream: Box::pin(stream),
            total,
            etag,
        }))
    }
}

/// Passes chunks through while hashing them and reporting the running total.
pub struct MeteredStream<S, F> {
    inner: S,
    hasher: Sha256,
    bytes_read: u64,
    on_progress: F,
}

impl<S, F> MeteredStream<S, F>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    F: FnMut(u64) + Unpin,
{
    /// Wrap `inner`, calling `on_progress` with the cumulative byte count.
    pub fn new(inner: S, on_progress: F) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
            on_progress,
        }
    }

    /// Total bytes seen so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Lowercase hex SHA256 of everything read.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<S, F> Stream for MeteredStream<S, F>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    F: FnMut(u64) + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            this.hasher.update(chunk);
            this.bytes_read += chunk.len() as u64;
            (this.on_progress)(this.bytes_read);
        }
        polled
    }
}
