//! Abstraction of networking so that custom fetch implementations can be
//! provided.
//!
//! The capture pipeline awaits fetches in-line (it is single-threaded and
//! cooperative), so the contract here is a plain async call rather than a
//! callback: one request in, one response or error out. Policy — caching,
//! coalescing, cooldowns, proxying, timeouts — lives above this trait in the
//! capture crate's fetcher.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use bytes::Bytes;
pub use http::{self, HeaderMap, Method};
pub use url::Url;

pub type SharedBackend = Arc<dyn FetchBackend>;
pub type BoxedFetchFuture = Pin<Box<dyn Future<Output = Result<FetchResponse, FetchError>> + Send>>;

/// A type that fetches raw bytes for the capture engine.
///
/// This may be over the network via http(s), via the filesystem, from an
/// in-memory fixture, or some other method. Implementations resolve
/// redirects themselves and report the final URL.
pub trait FetchBackend: Send + Sync + 'static {
    fn fetch(&self, request: FetchRequest) -> BoxedFetchFuture;
}

/// A single outgoing request.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// Hard deadline for the whole transfer. Backends must give up once it
    /// elapses; the fetcher maps that to a timeout failure.
    pub timeout: Duration,
}

impl FetchRequest {
    /// A GET request for the given URL with a 30 second deadline.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The successful outcome of a fetch: final URL, status and body.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL after redirects.
    pub url: String,
    pub status: u16,
    /// Content type as reported by the transport (headers, data-URL prelude,
    /// or file extension sniffing). `None` when the transport has no idea.
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub enum FetchError {
    /// Connection/DNS/protocol failure, or an unsupported URL scheme.
    Network(String),
    /// The backend's deadline elapsed.
    Timeout,
    /// Body could not be decoded (bad data URL, invalid UTF-8 where text was
    /// required, ...).
    Decode(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "network error: {msg}"),
            FetchError::Timeout => write!(f, "timed out"),
            FetchError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// A default noop backend: every fetch fails with a network error.
#[derive(Default)]
pub struct DummyFetchBackend;

impl FetchBackend for DummyFetchBackend {
    fn fetch(&self, request: FetchRequest) -> BoxedFetchFuture {
        Box::pin(async move {
            Err(FetchError::Network(format!(
                "no fetch backend configured (requested {})",
                request.url
            )))
        })
    }
}
