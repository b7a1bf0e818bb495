//! Networking (HTTP, filesystem, data URIs) for the snapdom capture engine.
//!
//! Provides the production implementation of
//! [`snapdom_traits::net::FetchBackend`]. Fetch *policy* — caching,
//! in-flight coalescing, proxying, negative cooldowns — does not live here;
//! this crate only moves bytes.

use std::time::Duration;

use bytes::Bytes;
use data_url::DataUrl;
use snapdom_traits::net::{
    BoxedFetchFuture, FetchBackend, FetchError, FetchRequest, FetchResponse,
};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:60.0) Gecko/20100101 Firefox/81.0";

/// Fetch backend over a shared reqwest client.
///
/// `data:` and `file:` URLs are answered without touching the network so
/// that inlined resources and local fixtures behave identically to remote
/// ones.
pub struct Backend {
    client: reqwest::Client,
}

impl Backend {
    pub fn new() -> Self {
        let builder = reqwest::Client::builder();
        #[cfg(feature = "cookies")]
        let builder = builder.cookie_store(true);
        // Building the default client only fails when TLS backends are
        // missing from the host, which is unrecoverable anyway.
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub fn shared() -> snapdom_traits::net::SharedBackend {
        std::sync::Arc::new(Self::new())
    }

    async fn fetch_inner(
        client: reqwest::Client,
        request: FetchRequest,
    ) -> Result<FetchResponse, FetchError> {
        match request.url.scheme() {
            "data" => fetch_data_url(&request.url),
            "file" => fetch_file(&request.url),
            "http" | "https" => fetch_http(client, request).await,
            other => Err(FetchError::Network(format!(
                "unsupported URL scheme: {other}"
            ))),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchBackend for Backend {
    fn fetch(&self, request: FetchRequest) -> BoxedFetchFuture {
        let client = self.client.clone();
        let timeout = request.timeout;
        Box::pin(async move {
            let url = request.url.to_string();
            let result = tokio::time::timeout(timeout, Self::fetch_inner(client, request))
                .await
                .unwrap_or(Err(FetchError::Timeout));
            if let Err(e) = &result {
                tracing::debug!("fetch of {url} failed: {e}");
            }
            result
        })
    }
}

fn fetch_data_url(url: &Url) -> Result<FetchResponse, FetchError> {
    let data_url =
        DataUrl::process(url.as_str()).map_err(|e| FetchError::Decode(format!("{e:?}")))?;
    let mime = data_url.mime_type().to_string();
    let (decoded, _fragment) = data_url
        .decode_to_vec()
        .map_err(|e| FetchError::Decode(format!("{e:?}")))?;
    Ok(FetchResponse {
        url: url.to_string(),
        status: 200,
        mime: Some(mime),
        bytes: Bytes::from(decoded),
    })
}

fn fetch_file(url: &Url) -> Result<FetchResponse, FetchError> {
    let content =
        std::fs::read(url.path()).map_err(|e| FetchError::Network(e.to_string()))?;
    Ok(FetchResponse {
        url: url.to_string(),
        status: 200,
        mime: mime_from_path(url.path()),
        bytes: Bytes::from(content),
    })
}

async fn fetch_http(
    client: reqwest::Client,
    request: FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let response = client
        .request(request.method, request.url)
        .headers(request.headers)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

    let url = response.url().to_string();
    let status = response.status().as_u16();
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    Ok(FetchResponse {
        url,
        status,
        mime,
        bytes,
    })
}

fn mime_from_path(path: &str) -> Option<String> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        "html" | "htm" => "text/html",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdom_traits::net::FetchRequest;

    #[tokio::test]
    async fn decodes_data_urls() {
        let backend = Backend::new();
        let url = Url::parse("data:text/plain;base64,aGVsbG8=").unwrap();
        let response = backend.fetch(FetchRequest::get(url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.mime.as_deref(), Some("text/plain"));
        assert_eq!(&response.bytes[..], b"hello");
    }

    #[tokio::test]
    async fn rejects_unknown_schemes() {
        let backend = Backend::new();
        let url = Url::parse("gopher://example.com/x").unwrap();
        let result = backend.fetch(FetchRequest::get(url)).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn fetches_over_http() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            let response = tiny_http::Response::from_string("body!").with_header(
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain"[..]).unwrap(),
            );
            request.respond(response).unwrap();
        });

        let backend = Backend::new();
        let url = Url::parse(&format!("http://{addr}/resource")).unwrap();
        let response = backend.fetch(FetchRequest::get(url)).await.unwrap();
        assert!(response.is_success());
        assert_eq!(&response.bytes[..], b"body!");
        assert_eq!(response.mime.as_deref(), Some("text/plain"));
        handle.join().unwrap();
    }
}
