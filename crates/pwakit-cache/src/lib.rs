//! # PWAKit Cache
//!
//! Versioned cache namespaces for the pwakit offline worker.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     └── Cache ("app-static-v3", "app-dynamic-v3", ...)
//!             └── request identity → response snapshot
//! ```
//!
//! Namespaces are replaced wholesale across deployments: the store manager
//! seeds the current generation's namespaces on install and deletes every
//! other namespace on activation. There is no per-entry TTL.

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use pwakit_net::Response;

pub mod manager;

pub use manager::{StoreConfig, StoreManager};

// ==================== Errors ====================

/// Errors that can occur in the cache store.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// A core-manifest asset could not be fetched during install.
    /// This aborts the install: a partially cached app is never activated.
    #[error("Seeding failed for {url}: {reason}")]
    SeedFailed { url: String, reason: String },
}

// ==================== Entry ====================

/// Normalized request identity used as a cache key.
///
/// Method plus the absolute URL, query string included. Only GET requests
/// are ever stored, but the method is kept in the key so a lookup can never
/// alias across methods.
pub fn entry_key(method: &Method, url: &Url) -> String {
    format!("{} {}", method, url)
}

/// A captured response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    /// Capture a snapshot of a fetched response, keyed by the request that
    /// produced it.
    pub fn from_response(request_url: &Url, method: &Method, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request_url.to_string(),
            method: method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            stored_at: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache ====================

/// One namespace: a map from request identity to response snapshot.
#[derive(Debug, Default)]
pub struct Cache {
    /// Namespace name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache namespace.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request identity.
    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry. Overwrites are last-writer-wins.
    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The storage engine: a set of named cache namespaces.
///
/// All access funnels through one `RwLock`, which is what serializes
/// concurrent readers and writers; callers hold no locks of their own.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a namespace, creating it if absent.
    pub async fn open(&self, name: &str) {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
    }

    /// Check if a namespace exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a namespace and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        self.caches.write().await.remove(name).is_some()
    }

    /// Get all namespace names.
    pub async fn keys(&self) -> Vec<String> {
        self.caches.read().await.keys().cloned().collect()
    }

    /// Store an entry in a namespace, creating the namespace if absent.
    pub async fn put_in(&self, namespace: &str, key: &str, entry: CacheEntry) {
        let mut caches = self.caches.write().await;
        caches
            .entry(namespace.to_string())
            .or_insert_with(|| Cache::new(namespace))
            .put(key, entry);
    }

    /// Match a request identity in one namespace.
    pub async fn match_in(&self, namespace: &str, key: &str) -> Option<CacheEntry> {
        self.caches
            .read()
            .await
            .get(namespace)
            .and_then(|cache| cache.match_key(key))
            .cloned()
    }

    /// Match a request identity across all namespaces.
    pub async fn match_any(&self, key: &str) -> Option<CacheEntry> {
        let caches = self.caches.read().await;
        for cache in caches.values() {
            if let Some(entry) = cache.match_key(key) {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Number of entries in a namespace (0 if absent).
    pub async fn entry_count(&self, namespace: &str) -> usize {
        self.caches
            .read()
            .await
            .get(namespace)
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_for(url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: b"body".to_vec(),
            stored_at: 0,
        }
    }

    #[test]
    fn test_entry_key_includes_query() {
        let url = Url::parse("https://example.com/search?q=abs").unwrap();
        assert_eq!(
            entry_key(&Method::GET, &url),
            "GET https://example.com/search?q=abs"
        );
    }

    #[test]
    fn test_cache_put_match_delete() {
        let mut cache = Cache::new("app-static-v1");
        let key = "GET https://example.com/style.css";

        assert!(cache.match_key(key).is_none());

        cache.put(key, entry_for("https://example.com/style.css"));
        assert!(cache.match_key(key).is_some());
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(key));
        assert!(cache.match_key(key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_storage_open_has_delete() {
        let storage = CacheStorage::new();

        assert!(!storage.has("v1").await);

        storage.open("v1").await;
        assert!(storage.has("v1").await);

        assert!(storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert!(!storage.delete("v1").await);
    }

    #[tokio::test]
    async fn test_storage_put_and_match() {
        let storage = CacheStorage::new();
        let key = "GET https://example.com/a.js";

        storage.put_in("dyn", key, entry_for("https://example.com/a.js")).await;

        assert!(storage.match_in("dyn", key).await.is_some());
        assert!(storage.match_in("static", key).await.is_none());
        assert!(storage.match_any(key).await.is_some());
        assert!(storage.match_any("GET https://example.com/b.js").await.is_none());
    }

    #[tokio::test]
    async fn test_storage_put_is_last_writer_wins() {
        let storage = CacheStorage::new();
        let key = "GET https://example.com/a.js";

        let mut first = entry_for("https://example.com/a.js");
        first.body = b"first".to_vec();
        let mut second = entry_for("https://example.com/a.js");
        second.body = b"second".to_vec();

        storage.put_in("dyn", key, first).await;
        storage.put_in("dyn", key, second).await;

        let stored = storage.match_in("dyn", key).await.unwrap();
        assert_eq!(stored.body, b"second");
        assert_eq!(storage.entry_count("dyn").await, 1);
    }

    #[tokio::test]
    async fn test_storage_keys() {
        let storage = CacheStorage::new();
        storage.open("app-static-v1").await;
        storage.open("app-dynamic-v1").await;

        let mut keys = storage.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["app-dynamic-v1", "app-static-v1"]);
    }
}
