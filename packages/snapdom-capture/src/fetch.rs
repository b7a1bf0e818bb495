//! The no-throw resource fetcher.
//!
//! `snap_fetch` never returns an error type: every outcome is a
//! [`SnapFetchResult`] value, and a missing resource is an ordinary state
//! the clone engine knows how to degrade around. Policy lives here — proxy
//! prefixing, per-kind timeouts, decode validation, routing through the
//! cache registry's single-flight and cooldown machinery — while byte
//! transport stays behind [`FetchBackend`].

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use snapdom_dom::Document;
use snapdom_traits::net::{FetchBackend, FetchError, FetchRequest, SharedBackend};
use url::Url;

use crate::cache::{Bucket, CacheRegistry};
use crate::options::CachePolicy;

/// Default deadline for raster resources.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default deadline for textual resources.
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(10);

/// `encodeURIComponent`'s escape set.
pub const COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Requested return shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchAs {
    DataUrl,
    Text,
    Blob,
}

/// Why a fetch failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Network,
    Timeout,
    Http,
    Decode,
}

/// The fetched payload, in the requested shape.
#[derive(Clone, Debug)]
pub enum FetchData {
    DataUrl(String),
    Text(String),
    Blob { bytes: Bytes, mime: String },
}

impl FetchData {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FetchData::DataUrl(s) | FetchData::Text(s) => Some(s),
            FetchData::Blob { .. } => None,
        }
    }
}

/// The uniform fetch outcome. `ok == data.is_some()`; `reason` is only set
/// on failure.
#[derive(Clone, Debug)]
pub struct SnapFetchResult {
    pub ok: bool,
    pub data: Option<FetchData>,
    pub status: u16,
    pub url: String,
    pub from_cache: bool,
    pub mime: Option<String>,
    pub reason: Option<FailureReason>,
}

impl SnapFetchResult {
    fn success(url: String, data: FetchData, from_cache: bool, mime: Option<String>) -> Self {
        Self {
            ok: true,
            data: Some(data),
            status: 200,
            url,
            from_cache,
            mime,
            reason: None,
        }
    }

    fn failure(url: String, reason: FailureReason) -> Self {
        Self {
            ok: false,
            data: None,
            status: 0,
            url,
            from_cache: false,
            mime: None,
            reason: Some(reason),
        }
    }

    /// The data URI (or text) payload, if this result carries one.
    pub fn payload(&self) -> Option<&str> {
        self.data.as_ref().and_then(FetchData::as_str)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FetchOptions {
    pub as_: FetchAs,
    pub timeout: Duration,
    /// Suppress the warning log on failure.
    pub silent: bool,
    /// Positive store for the converted value. `None` skips memoization.
    pub bucket: Option<Bucket>,
    /// Validate that the payload decodes as a raster image (the engine's
    /// stand-in for an `Image`-element decode); only applied when no proxy
    /// is configured.
    pub validate_raster: bool,
}

impl FetchOptions {
    pub fn data_url(bucket: Bucket) -> Self {
        Self {
            as_: FetchAs::DataUrl,
            timeout: IMAGE_TIMEOUT,
            silent: false,
            bucket: Some(bucket),
            validate_raster: false,
        }
    }

    pub fn image(bucket: Bucket) -> Self {
        Self {
            validate_raster: true,
            ..Self::data_url(bucket)
        }
    }

    pub fn text() -> Self {
        Self {
            as_: FetchAs::Text,
            timeout: TEXT_TIMEOUT,
            silent: false,
            bucket: Some(Bucket::Resource),
            validate_raster: false,
        }
    }

    pub fn blob() -> Self {
        Self {
            as_: FetchAs::Blob,
            timeout: IMAGE_TIMEOUT,
            silent: false,
            bucket: None,
            validate_raster: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Per-capture fetch front end: backend + registry + the capture's frozen
/// cache policy and proxy prefix.
pub struct Fetcher {
    backend: SharedBackend,
    registry: Arc<CacheRegistry>,
    policy: CachePolicy,
    use_proxy: String,
}

impl Fetcher {
    pub fn new(
        backend: SharedBackend,
        registry: Arc<CacheRegistry>,
        policy: CachePolicy,
        use_proxy: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            policy,
            use_proxy: use_proxy.into(),
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> SharedBackend {
        self.backend.clone()
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn proxied(&self) -> bool {
        !self.use_proxy.is_empty()
    }

    /// The no-throw fetch contract.
    pub async fn snap_fetch(
        &self,
        doc: &Document,
        raw_url: &str,
        options: FetchOptions,
    ) -> SnapFetchResult {
        let result = self.snap_fetch_inner(doc, raw_url, options).await;
        if !result.ok && !options.silent {
            tracing::warn!(
                "fetch of {raw_url} failed: {:?}",
                result.reason.unwrap_or(FailureReason::Network)
            );
        }
        result
    }

    async fn snap_fetch_inner(
        &self,
        doc: &Document,
        raw_url: &str,
        options: FetchOptions,
    ) -> SnapFetchResult {
        // Blob URLs resolve against the document's blob store, never the
        // network.
        if raw_url.starts_with("blob:") {
            return match doc.blob_entry(raw_url) {
                Some(entry) => {
                    let mime = entry.mime.clone();
                    let data = match options.as_ {
                        FetchAs::DataUrl => {
                            FetchData::DataUrl(encode_data_uri(&mime, &entry.bytes))
                        }
                        FetchAs::Text => match String::from_utf8(entry.bytes.to_vec()) {
                            Ok(text) => FetchData::Text(text),
                            Err(_) => {
                                return SnapFetchResult::failure(
                                    raw_url.to_string(),
                                    FailureReason::Decode,
                                );
                            }
                        },
                        FetchAs::Blob => FetchData::Blob {
                            bytes: entry.bytes.clone(),
                            mime: mime.clone(),
                        },
                    };
                    SnapFetchResult::success(raw_url.to_string(), data, false, Some(mime))
                }
                None => SnapFetchResult::failure(raw_url.to_string(), FailureReason::Network),
            };
        }

        // An existing data URI is already inline; requesting it back as a
        // data URL is the identity.
        if raw_url.starts_with("data:") && options.as_ == FetchAs::DataUrl {
            let mime = data_uri_mime(raw_url);
            return SnapFetchResult::success(
                raw_url.to_string(),
                FetchData::DataUrl(raw_url.to_string()),
                false,
                mime,
            );
        }

        let Some(absolute) = doc.resolve_url(raw_url) else {
            return SnapFetchResult::failure(raw_url.to_string(), FailureReason::Network);
        };

        // With a proxy configured, only the proxied URL is attempted.
        let (fetch_url, proxied) = if self.use_proxy.is_empty() {
            (absolute.clone(), false)
        } else {
            let proxied = format!(
                "{}{}",
                self.use_proxy,
                utf8_percent_encode(absolute.as_str(), COMPONENT)
            );
            match Url::parse(&proxied) {
                Ok(url) => (url, true),
                Err(_) => {
                    return SnapFetchResult::failure(raw_url.to_string(), FailureReason::Network);
                }
            }
        };

        let validate_raster = options.validate_raster && !proxied;

        match options.as_ {
            FetchAs::Blob => {
                // Blob results are not string-shaped, so they bypass the
                // memo stores (but not the backend).
                match fetch_bytes(self.backend.clone(), fetch_url, options.timeout).await {
                    Ok((url, mime, bytes)) => {
                        let mime = mime.unwrap_or_else(|| sniff_mime(&bytes).to_string());
                        SnapFetchResult::success(
                            url,
                            FetchData::Blob {
                                bytes,
                                mime: mime.clone(),
                            },
                            false,
                            Some(mime),
                        )
                    }
                    Err(reason) => SnapFetchResult::failure(absolute.to_string(), reason),
                }
            }
            FetchAs::DataUrl | FetchAs::Text => {
                let want_text = options.as_ == FetchAs::Text;
                let backend = self.backend.clone();
                let timeout = options.timeout;
                let producer_url = fetch_url.clone();
                let producer = async move {
                    let (_url, mime, bytes) =
                        fetch_bytes(backend, producer_url, timeout).await?;
                    if want_text {
                        String::from_utf8(bytes.to_vec()).map_err(|_| FailureReason::Decode)
                    } else {
                        let mime = mime.unwrap_or_else(|| sniff_mime(&bytes).to_string());
                        if validate_raster && is_raster_mime(&mime) {
                            image::load_from_memory(&bytes)
                                .map_err(|_| FailureReason::Decode)?;
                        }
                        Ok(encode_data_uri(&mime, &bytes))
                    }
                };

                let key = absolute.to_string();
                let outcome = match options.bucket {
                    Some(bucket) => {
                        self.registry
                            .get_or_fetch(bucket, &key, self.policy, producer)
                            .await
                    }
                    None => producer.await.map(|value| (value, false)),
                };

                match outcome {
                    Ok((value, from_cache)) => {
                        let (data, mime) = if want_text {
                            (FetchData::Text(value), None)
                        } else {
                            let mime = data_uri_mime(&value);
                            (FetchData::DataUrl(value), mime)
                        };
                        SnapFetchResult::success(key, data, from_cache, mime)
                    }
                    Err(reason) => SnapFetchResult::failure(key, reason),
                }
            }
        }
    }
}

async fn fetch_bytes(
    backend: SharedBackend,
    url: Url,
    timeout: Duration,
) -> Result<(String, Option<String>, Bytes), FailureReason> {
    let request = FetchRequest::get(url).with_timeout(timeout);
    let response = backend.fetch(request).await.map_err(|e| match e {
        FetchError::Network(_) => FailureReason::Network,
        FetchError::Timeout => FailureReason::Timeout,
        FetchError::Decode(_) => FailureReason::Decode,
    })?;
    if !response.is_success() {
        return Err(FailureReason::Http);
    }
    Ok((response.url, response.mime, response.bytes))
}

/// Builds a `data:` URI from a mime type and raw bytes.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    let encoded_capacity = BASE64.encode(bytes).len();
    let mut out = String::with_capacity(encoded_capacity + mime.len() + 13);
    out.push_str("data:");
    out.push_str(mime);
    out.push_str(";base64,");
    BASE64.encode_string(bytes, &mut out);
    out
}

/// Extracts the mime type out of a `data:` URI.
pub fn data_uri_mime(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    let mime = &rest[..end];
    (!mime.is_empty()).then(|| mime.to_string())
}

fn is_raster_mime(mime: &str) -> bool {
    matches!(
        mime,
        "image/png" | "image/jpeg" | "image/gif" | "image/webp" | "image/bmp"
    )
}

/// Best-effort mime sniffing for transports that report none.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [0x77, 0x4F, 0x46, 0x32, ..] => "font/woff2",
        [0x77, 0x4F, 0x46, 0x46, ..] => "font/woff",
        [0x00, 0x01, 0x00, 0x00, ..] => "font/ttf",
        [b'O', b'T', b'T', b'O', ..] => "font/otf",
        _ => {
            let head = &bytes[..bytes.len().min(256)];
            if head.trim_ascii_start().starts_with(b"<svg")
                || head.trim_ascii_start().starts_with(b"<?xml")
            {
                "image/svg+xml"
            } else {
                "application/octet-stream"
            }
        }
    }
}
