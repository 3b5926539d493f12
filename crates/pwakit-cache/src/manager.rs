//! Store lifecycle: install-time seeding and activation-time eviction.

use std::sync::Arc;

use http::Method;
use tracing::{debug, info, warn};
use url::Url;

use pwakit_net::{Request, ResourceLoader};

use crate::{entry_key, CacheEntry, CacheError, CacheStorage};

/// Configuration for one deployed generation of the store.
///
/// Passed in at construction so multiple generations are constructible in
/// isolation; nothing here lives in module-scope constants.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Generation tag, e.g. "v3". Namespaces not carrying this tag are
    /// evicted on activation.
    pub generation_tag: String,

    /// Namespace seeded at install time.
    pub static_namespace: String,

    /// Namespace populated at runtime by the strategy executor.
    pub dynamic_namespace: String,

    /// Assets that MUST be cached for the install to succeed.
    pub core_manifest: Vec<Url>,

    /// Assets cached opportunistically; failures never block install.
    pub bulk_manifest: Vec<Url>,

    /// Last-resort offline document for failed navigations.
    pub app_shell: Url,
}

impl StoreConfig {
    /// Create a config for an app and generation tag. The app shell doubles
    /// as the first core-manifest entry.
    pub fn new(app: &str, generation_tag: &str, app_shell: Url) -> Self {
        Self {
            generation_tag: generation_tag.to_string(),
            static_namespace: format!("{}-static-{}", app, generation_tag),
            dynamic_namespace: format!("{}-dynamic-{}", app, generation_tag),
            core_manifest: vec![app_shell.clone()],
            bulk_manifest: Vec::new(),
            app_shell,
        }
    }

    /// Set the core manifest (the app shell is expected to be listed).
    pub fn core_manifest(mut self, manifest: Vec<Url>) -> Self {
        self.core_manifest = manifest;
        self
    }

    /// Set the bulk manifest.
    pub fn bulk_manifest(mut self, manifest: Vec<Url>) -> Self {
        self.bulk_manifest = manifest;
        self
    }

    /// Namespace names belonging to this generation.
    pub fn allowed_namespaces(&self) -> [&str; 2] {
        [&self.static_namespace, &self.dynamic_namespace]
    }

    /// Cache key of the app shell document.
    pub fn app_shell_key(&self) -> String {
        entry_key(&Method::GET, &self.app_shell)
    }
}

/// Owns namespace lifecycle: seeding on install, eviction on activation.
///
/// This is the only component that deletes namespaces. Entry writes outside
/// seeding belong to the strategy executor.
pub struct StoreManager {
    storage: Arc<CacheStorage>,
    config: StoreConfig,
}

impl StoreManager {
    /// Create a new store manager.
    pub fn new(storage: Arc<CacheStorage>, config: StoreConfig) -> Self {
        Self { storage, config }
    }

    /// The storage engine handle.
    pub fn storage(&self) -> Arc<CacheStorage> {
        Arc::clone(&self.storage)
    }

    /// This generation's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Seed the static namespace from the manifests.
    ///
    /// Core-manifest fetches are all-or-nothing: every asset is fetched
    /// before anything is written, and any failure (transport error or
    /// non-success status) aborts the seed, so a partially cached app shell
    /// can never activate. Bulk-manifest fetches afterwards are
    /// best-effort.
    pub async fn seed(&self, loader: &ResourceLoader) -> Result<(), CacheError> {
        let mut staged = Vec::with_capacity(self.config.core_manifest.len());

        for url in &self.config.core_manifest {
            let response = loader
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| CacheError::SeedFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            if !response.ok() {
                return Err(CacheError::SeedFailed {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }

            staged.push((
                entry_key(&Method::GET, url),
                CacheEntry::from_response(url, &Method::GET, &response),
            ));
        }

        for (key, entry) in staged {
            self.storage
                .put_in(&self.config.static_namespace, &key, entry)
                .await;
        }

        info!(
            namespace = %self.config.static_namespace,
            assets = self.config.core_manifest.len(),
            "Core manifest seeded"
        );

        for url in &self.config.bulk_manifest {
            match loader.fetch(Request::get(url.clone())).await {
                Ok(response) if response.ok() => {
                    let key = entry_key(&Method::GET, url);
                    let entry = CacheEntry::from_response(url, &Method::GET, &response);
                    self.storage
                        .put_in(&self.config.static_namespace, &key, entry)
                        .await;
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status, "Skipping bulk asset");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping unreachable bulk asset");
                }
            }
        }

        Ok(())
    }

    /// Delete every namespace not belonging to the current generation.
    ///
    /// Deletions are independent and best-effort; a failed deletion is
    /// logged and never fails activation. Returns the number of namespaces
    /// removed.
    pub async fn evict_stale(&self) -> usize {
        let allowed = self.config.allowed_namespaces();
        let mut evicted = 0;

        for name in self.storage.keys().await {
            if allowed.contains(&name.as_str()) {
                continue;
            }
            if self.storage.delete(&name).await {
                debug!(namespace = %name, "Evicted stale namespace");
                evicted += 1;
            } else {
                warn!(namespace = %name, "Stale namespace already gone");
            }
        }

        if evicted > 0 {
            info!(evicted, generation = %self.config.generation_tag, "Stale namespaces evicted");
        }

        evicted
    }
}
