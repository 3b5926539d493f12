//! Fetch strategy execution: network-first, cache-first, passthrough.
//!
//! Side effects are strictly additive. Strategies populate the store but
//! never mutate a response in flight; the caller always receives the
//! authentic upstream bytes. Store failures are swallowed at the
//! side-effect boundary and never reach the page.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{debug, trace, warn};

use pwakit_cache::{entry_key, CacheEntry, CacheStorage, StoreConfig};
use pwakit_net::{Destination, Request, ResourceLoader, Response, ResponseKind};

use crate::router::{RequestClass, Router};
use crate::WorkerError;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedSource {
    /// Live network response.
    Network,
    /// Exact cache match.
    Cache,
    /// App shell offline fallback.
    AppShell,
    /// Synthesized offline failure response.
    Offline,
}

/// Response handed back to the intercepted caller.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    /// Status code.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Where the response came from.
    pub source: ServedSource,
}

impl ServedResponse {
    /// Wrap a live network response.
    pub fn from_network(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ServedSource::Network,
        }
    }

    /// Rebuild a response from a cache snapshot.
    pub fn from_entry(entry: &CacheEntry, source: ServedSource) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &entry.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Self {
            status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(entry.body.clone()),
            source,
        }
    }

    /// Synthesized last-resort failure response.
    pub fn offline() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );

        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::from_static(b"Offline - Content not available"),
            source: ServedSource::Offline,
        }
    }

    /// Whether this response was served from the store.
    pub fn is_from_cache(&self) -> bool {
        matches!(self.source, ServedSource::Cache | ServedSource::AppShell)
    }
}

/// The single cacheability rule shared by every population path.
///
/// Only a GET without a Range header, answered 200 with a clonable (basic
/// or CORS) response, may be stored. Partial content and opaque
/// cross-origin responses are policy exclusions, not errors.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
    request.method == Method::GET
        && !request.has_range()
        && response.status == StatusCode::OK
        && matches!(response.kind, ResponseKind::Basic | ResponseKind::Cors)
}

/// Executes the caching strategy chosen by the router.
///
/// The executor is the only component that writes entries; namespace
/// deletion stays with the store manager.
pub struct StrategyExecutor {
    loader: Arc<ResourceLoader>,
    storage: Arc<CacheStorage>,
    config: StoreConfig,
    router: Router,
}

impl StrategyExecutor {
    /// Create a new strategy executor.
    pub fn new(
        loader: Arc<ResourceLoader>,
        storage: Arc<CacheStorage>,
        config: StoreConfig,
        router: Router,
    ) -> Self {
        Self {
            loader,
            storage,
            config,
            router,
        }
    }

    /// Handle an intercepted request.
    ///
    /// Passthrough classes surface transport errors verbatim, as the host
    /// would; the caching classes always resolve to a response.
    pub async fn handle(&self, request: Request) -> Result<ServedResponse, WorkerError> {
        match self.router.classify(&request) {
            RequestClass::NonCacheable | RequestClass::CrossOrigin => {
                let response = self.loader.fetch(request).await?;
                Ok(ServedResponse::from_network(response))
            }
            RequestClass::Navigation => Ok(self.network_first(request).await),
            RequestClass::SameOriginStatic => Ok(self.cache_first(request).await),
        }
    }

    /// Network-first: a healthy live response wins; cache, then app shell,
    /// cover failure so a mid-navigation user never sees a bare protocol
    /// error.
    async fn network_first(&self, request: Request) -> ServedResponse {
        let key = entry_key(&request.method, &request.url);

        match self.loader.fetch(request.clone()).await {
            Ok(response) if response.ok() => {
                // Fire-and-forget: the caller is never blocked on the write
                self.populate_detached(&self.config.dynamic_namespace, &request, &response);
                ServedResponse::from_network(response)
            }
            Ok(response) => {
                // The server answered with an error status. Never cache it;
                // prefer a cached document, and relay the upstream error
                // only when nothing cached can stand in for it.
                debug!(url = %request.url, status = %response.status, "Error status, trying cache");

                if let Some(entry) = self.storage.match_any(&key).await {
                    return ServedResponse::from_entry(&entry, ServedSource::Cache);
                }
                if let Some(shell) = self.storage.match_any(&self.config.app_shell_key()).await {
                    return ServedResponse::from_entry(&shell, ServedSource::AppShell);
                }
                ServedResponse::from_network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, falling back");

                if let Some(entry) = self.storage.match_any(&key).await {
                    return ServedResponse::from_entry(&entry, ServedSource::Cache);
                }
                if let Some(shell) = self.storage.match_any(&self.config.app_shell_key()).await {
                    return ServedResponse::from_entry(&shell, ServedSource::AppShell);
                }
                ServedResponse::offline()
            }
        }
    }

    /// Cache-first: a hit never touches the network (staleness rolls with
    /// the namespace generation); a miss fetches and populates.
    async fn cache_first(&self, request: Request) -> ServedResponse {
        let key = entry_key(&request.method, &request.url);

        if let Some(entry) = self.storage.match_any(&key).await {
            if request.destination == Destination::Document {
                self.revalidate_detached(request);
            }
            return ServedResponse::from_entry(&entry, ServedSource::Cache);
        }

        match self.loader.fetch(request.clone()).await {
            Ok(response) => {
                if is_cacheable(&request, &response) {
                    let entry = CacheEntry::from_response(&request.url, &request.method, &response);
                    self.storage
                        .put_in(&self.config.dynamic_namespace, &key, entry)
                        .await;
                }
                ServedResponse::from_network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed on cache miss");

                if request.destination == Destination::Document {
                    if let Some(shell) =
                        self.storage.match_any(&self.config.app_shell_key()).await
                    {
                        return ServedResponse::from_entry(&shell, ServedSource::AppShell);
                    }
                }
                ServedResponse::offline()
            }
        }
    }

    /// Store a copy of a response without blocking the caller.
    fn populate_detached(&self, namespace: &str, request: &Request, response: &Response) {
        if !is_cacheable(request, response) {
            return;
        }

        let key = entry_key(&request.method, &request.url);
        let entry = CacheEntry::from_response(&request.url, &request.method, response);
        let storage = Arc::clone(&self.storage);
        let namespace = namespace.to_string();

        tokio::spawn(async move {
            storage.put_in(&namespace, &key, entry).await;
            trace!(key = %key, namespace = %namespace, "Populated cache");
        });
    }

    /// Refresh a cached document in the background. Failures are ignored.
    fn revalidate_detached(&self, request: Request) {
        let loader = Arc::clone(&self.loader);
        let storage = Arc::clone(&self.storage);
        let namespace = self.config.static_namespace.clone();

        tokio::spawn(async move {
            match loader.fetch(request.clone()).await {
                Ok(response) if is_cacheable(&request, &response) => {
                    let key = entry_key(&request.method, &request.url);
                    let entry =
                        CacheEntry::from_response(&request.url, &request.method, &response);
                    storage.put_in(&namespace, &key, entry).await;
                    trace!(url = %request.url, "Refreshed cached document");
                }
                Ok(response) => {
                    trace!(url = %request.url, status = %response.status, "Skipping refresh");
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Background refresh failed");
                }
            }
        });
    }
}
