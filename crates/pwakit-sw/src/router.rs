//! Request classification for the fetch interception path.
//!
//! Classification is a pure function of the request plus configuration, so
//! cacheability policy has a single source of truth and is testable without
//! a running worker.

use tracing::trace;
use url::Url;

use pwakit_net::{Destination, Request};

/// Caching strategy bucket for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Document or API load: network-first with cache fallback.
    Navigation,
    /// Same-origin subresource: cache-first with network populate.
    SameOriginStatic,
    /// Cross-origin: never intercepted, passed straight to the network.
    CrossOrigin,
    /// Non-GET: never intercepted for caching purposes.
    NonCacheable,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The app's own origin.
    pub origin: Url,
    /// URL path prefixes routed with navigation (network-first) semantics.
    pub api_prefixes: Vec<String>,
}

impl RouterConfig {
    /// Create a config for an origin with the default API prefix.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            api_prefixes: vec!["/api/".to_string()],
        }
    }

    /// Set the API prefixes.
    pub fn api_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.api_prefixes = prefixes;
        self
    }
}

/// Classifies intercepted requests into strategy buckets.
#[derive(Debug, Clone)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    /// Create a new router.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Classify a request.
    ///
    /// Rules, in priority order: the method check comes first (mutating
    /// requests must never reach a caching strategy), and the own-origin
    /// check comes last among the cacheable cases (cross-origin responses
    /// are frequently opaque, and third-party CDNs manage their own
    /// caching).
    pub fn classify(&self, request: &Request) -> RequestClass {
        let class = if request.method != http::Method::GET {
            RequestClass::NonCacheable
        } else if request.destination == Destination::Document
            || request.accepts_html()
            || self.is_api_path(&request.url)
        {
            RequestClass::Navigation
        } else if request.url.origin() == self.config.origin.origin() {
            RequestClass::SameOriginStatic
        } else {
            RequestClass::CrossOrigin
        };

        trace!(url = %request.url, method = %request.method, ?class, "Classified request");
        class
    }

    fn is_api_path(&self, url: &Url) -> bool {
        self.config
            .api_prefixes
            .iter()
            .any(|prefix| url.path().starts_with(prefix.as_str()))
    }
}
