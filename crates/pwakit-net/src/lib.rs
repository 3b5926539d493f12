//! # PWAKit Net
//!
//! HTTP fetch primitive for the pwakit offline worker.
//!
//! ## Design Goals
//!
//! 1. **Async fetch**: Non-blocking request/response with per-request timeout
//! 2. **Response kinds**: Basic / CORS / opaque tagging for cacheability checks
//! 3. **Upstream completion**: Bounded-retry client for the completion provider

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod completion;

pub use completion::{
    ChatMessage, CompletionClient, CompletionConfig, CompletionError, CompletionRequest,
    CompletionResponse,
};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of resource a request is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Top-level document load.
    Document,
    Script,
    Style,
    Image,
    Media,
    Font,
    /// App manifest.
    Manifest,
    /// Anything else (XHR, fetch, etc.).
    #[default]
    Other,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: Destination::Other,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Some(body),
            destination: Destination::Other,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether the Accept header indicates an HTML document.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
    }

    /// Whether this is a ranged (partial content) request.
    pub fn has_range(&self) -> bool {
        self.headers.contains_key(http::header::RANGE)
    }
}

/// How readable a response is to the requesting origin.
///
/// Mirrors the visibility classes of fetched responses: same-origin
/// responses are fully readable, cross-origin responses are readable only
/// when the server opts in, and everything else is opaque. Opaque responses
/// must never be cached because their bodies cannot be safely cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response, fully readable.
    Basic,
    /// Cross-origin response with CORS opt-in, readable.
    Cors,
    /// Cross-origin response without CORS, not readable.
    Opaque,
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    /// Final URL (after redirects).
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<Mime>,
    pub content_length: Option<u64>,
    pub kind: ResponseKind,
    pub body: Bytes,
}

impl Response {
    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Check if this is a partial-content response.
    pub fn is_partial(&self) -> bool {
        self.status == StatusCode::PARTIAL_CONTENT
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Derive the response kind from the requesting URL, the final URL, and the
/// response headers.
pub fn response_kind(request_url: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseKind {
    if request_url.origin() == final_url.origin() {
        ResponseKind::Basic
    } else if headers.contains_key(http::header::ACCESS_CONTROL_ALLOW_ORIGIN) {
        ResponseKind::Cors
    } else {
        ResponseKind::Opaque
    }
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "PWAKit/1.0".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Resource loader for fetching URLs.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!("ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Fetch a URL.
    pub async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok());

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let kind = response_kind(&request.url, &url, &headers);

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            kind = ?kind,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            request_id: request.id,
            url,
            status,
            headers,
            content_type,
            content_length,
            kind,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .destination(Destination::Script)
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Script);
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_accepts_html() {
        let url = Url::parse("https://example.com/page").unwrap();
        let request = Request::get(url.clone()).header(
            http::header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        assert!(request.accepts_html());

        let request = Request::get(url).header(
            http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        assert!(!request.accepts_html());
    }

    #[test]
    fn test_has_range() {
        let url = Url::parse("https://example.com/video.mp4").unwrap();
        let request =
            Request::get(url.clone()).header(http::header::RANGE, HeaderValue::from_static("bytes=0-1023"));
        assert!(request.has_range());
        assert!(!Request::get(url).has_range());
    }

    #[test]
    fn test_response_kind_same_origin() {
        let request_url = Url::parse("https://example.com/a.js").unwrap();
        let final_url = Url::parse("https://example.com/a.js").unwrap();
        let kind = response_kind(&request_url, &final_url, &HeaderMap::new());
        assert_eq!(kind, ResponseKind::Basic);
    }

    #[test]
    fn test_response_kind_cross_origin() {
        let request_url = Url::parse("https://example.com/a.js").unwrap();
        let final_url = Url::parse("https://cdn.example.net/a.js").unwrap();

        let kind = response_kind(&request_url, &final_url, &HeaderMap::new());
        assert_eq!(kind, ResponseKind::Opaque);

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        let kind = response_kind(&request_url, &final_url, &headers);
        assert_eq!(kind, ResponseKind::Cors);
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert_eq!(config.user_agent, "PWAKit/1.0");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("hi")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/hello", server.uri())).unwrap();
        let response = loader.fetch(Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.kind, ResponseKind::Basic);
        assert_eq!(response.text().unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Nothing listens on this address
        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        let result = loader.fetch(Request::get(url)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        let result = loader
            .fetch(Request::get(url).timeout(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(NetError::Timeout(_))));
    }
}
