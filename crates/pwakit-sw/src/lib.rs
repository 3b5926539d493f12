//! # PWAKit SW
//!
//! Offline worker for a progressive web app: lifecycle state machine,
//! request routing, and fetch strategy execution over versioned cache
//! namespaces.
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── Registration (installing / waiting / active)
//!     ├── Clients (controlled pages)
//!     ├── StoreManager ── seed / evict_stale ──→ CacheStorage
//!     └── StrategyExecutor
//!             ├── Router (classify)
//!             └── network-first / cache-first / passthrough
//! ```
//!
//! Control flow: install seeds the store (all-or-nothing), activation
//! evicts stale namespaces and then claims open clients, and every
//! intercepted request afterwards is classified and resolved with either a
//! cached or freshly fetched response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use url::Url;

use pwakit_cache::{CacheError, CacheStorage, StoreConfig, StoreManager};
use pwakit_net::{NetError, Request, ResourceLoader};

pub mod router;
pub mod strategy;

pub use router::{RequestClass, Router, RouterConfig};
pub use strategy::{is_cacheable, ServedResponse, ServedSource, StrategyExecutor};

// ==================== Errors ====================

/// Errors that can occur in the offline worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("State error: {0}")]
    StateError(String),

    #[error("Install failed: {0}")]
    InstallFailed(#[from] CacheError),

    #[error("Network error: {0}")]
    NetworkError(#[from] NetError),

    #[error("Sync error: {0}")]
    SyncError(String),
}

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Initial state.
    Parsed,
    /// Installing (seeding the store).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (evicting stale namespaces).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced, or install failed).
    Redundant,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

// ==================== Service Worker ====================

/// One worker instance of a deployed generation.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// Generation tag this instance serves.
    pub generation: String,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker for a generation.
    pub fn new(generation: &str) -> Self {
        Self {
            id: WorkerId::new(),
            generation: generation.to_string(),
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

// ==================== Registration ====================

/// Tracks the installing / waiting / active worker slots.
///
/// Only one worker is active at a time; a new deployment always starts a
/// fresh instance in the installing slot.
#[derive(Debug, Default)]
pub struct Registration {
    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start installing a new worker for a generation.
    pub fn begin_install(&mut self, generation: &str) -> WorkerId {
        let mut worker = ServiceWorker::new(generation);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Mark the installing worker redundant after a failed install.
    pub fn install_failed(&mut self) -> Option<ServiceWorker> {
        self.installing.take().map(|mut worker| {
            worker.set_state(WorkerState::Redundant);
            worker
        })
    }

    /// Promote the waiting worker to active, retiring the old one.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);

            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
            }

            worker.set_state(WorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Skip waiting (force promotion).
    pub fn skip_waiting(&mut self) {
        self.activate();
    }
}

// ==================== Clients ====================

/// A controlled page.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker currently controlling this client, if any.
    pub controller: Option<WorkerId>,
}

impl Client {
    /// Create a new client.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            controller: None,
        }
    }
}

/// The set of open pages this worker may control.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create a new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Take control of every open client immediately, without waiting for
    /// a reload. Returns the IDs of clients whose controller changed.
    pub fn claim(&mut self, worker: WorkerId) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed.push(client.id.clone());
            }
        }
        claimed
    }

    /// Number of clients controlled by a worker.
    pub fn controlled_by(&self, worker: WorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no known clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Control Messages ====================

/// Messages the page can send to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote the waiting worker immediately.
    SkipWaiting,
    /// Ask for the current generation tag.
    GetVersion,
}

/// Replies the worker sends back to the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    /// The current generation tag.
    Version { version: String },
}

// ==================== Sync Delegate ====================

/// Hook invoked after activation when pending data may be synchronized.
///
/// The worker carries no sync business logic of its own; implementors get
/// exactly one call per activation and any error is logged and dropped.
pub trait SyncDelegate: Send + Sync {
    fn sync_pending(&self) -> Result<(), WorkerError>;
}

/// No-op delegate.
pub struct NoopSync;

impl SyncDelegate for NoopSync {
    fn sync_pending(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

// ==================== Events ====================

/// Worker events.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker changed state.
    StateChange { worker: WorkerId, state: WorkerState },
    /// A client came under new control.
    ControllerChange { client_id: String },
}

// ==================== Offline Worker ====================

/// The offline worker container: wires the store manager, router, and
/// strategy executor to the host lifecycle.
pub struct OfflineWorker {
    registration: RwLock<Registration>,

    /// Open pages.
    pub clients: Arc<RwLock<Clients>>,

    loader: Arc<ResourceLoader>,
    manager: StoreManager,
    executor: StrategyExecutor,
    sync: Option<Arc<dyn SyncDelegate>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Create a new worker over a storage engine and loader.
    pub fn new(
        loader: Arc<ResourceLoader>,
        storage: Arc<CacheStorage>,
        store_config: StoreConfig,
        router_config: RouterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let manager = StoreManager::new(Arc::clone(&storage), store_config.clone());
        let executor = StrategyExecutor::new(
            Arc::clone(&loader),
            storage,
            store_config,
            Router::new(router_config),
        );

        (
            Self {
                registration: RwLock::new(Registration::new()),
                clients: Arc::new(RwLock::new(Clients::new())),
                loader,
                manager,
                executor,
                sync: None,
                event_tx,
            },
            event_rx,
        )
    }

    /// Attach a sync delegate.
    pub fn with_sync_delegate(mut self, delegate: Arc<dyn SyncDelegate>) -> Self {
        self.sync = Some(delegate);
        self
    }

    /// The generation tag this worker serves.
    pub fn generation(&self) -> &str {
        &self.manager.config().generation_tag
    }

    /// Current state of the newest worker instance, if any.
    pub async fn state(&self) -> Option<WorkerState> {
        let registration = self.registration.read().await;
        registration
            .installing
            .as_ref()
            .or(registration.waiting.as_ref())
            .or(registration.active.as_ref())
            .map(|w| w.state)
    }

    /// Handle the install lifecycle event: seed the store all-or-nothing.
    ///
    /// On failure the installing worker goes redundant and the error
    /// propagates; the instance must never activate over a partial seed.
    pub async fn handle_install(&self) -> Result<(), WorkerError> {
        let worker_id = {
            let mut registration = self.registration.write().await;
            let id = registration.begin_install(self.manager.config().generation_tag.as_str());
            let _ = self.event_tx.send(WorkerEvent::StateChange {
                worker: id,
                state: WorkerState::Installing,
            });
            id
        };

        info!(generation = %self.generation(), "Worker installing");

        match self.manager.seed(&self.loader).await {
            Ok(()) => {
                let mut registration = self.registration.write().await;
                registration.install_complete();
                let _ = self.event_tx.send(WorkerEvent::StateChange {
                    worker: worker_id,
                    state: WorkerState::Installed,
                });
                info!(generation = %self.generation(), "Install complete");
                Ok(())
            }
            Err(e) => {
                let mut registration = self.registration.write().await;
                registration.install_failed();
                let _ = self.event_tx.send(WorkerEvent::StateChange {
                    worker: worker_id,
                    state: WorkerState::Redundant,
                });
                error!(error = %e, "Install aborted");
                Err(e.into())
            }
        }
    }

    /// Handle the activate lifecycle event: evict stale namespaces, then
    /// claim open clients.
    ///
    /// Claiming happens strictly after eviction completes so open pages
    /// never observe a mixed old/new namespace state.
    pub async fn handle_activate(&self) -> Result<(), WorkerError> {
        let worker_id = {
            let mut registration = self.registration.write().await;
            let worker = registration
                .waiting
                .as_mut()
                .ok_or_else(|| WorkerError::StateError("no waiting worker".to_string()))?;
            worker.set_state(WorkerState::Activating);
            let id = worker.id;
            let _ = self.event_tx.send(WorkerEvent::StateChange {
                worker: id,
                state: WorkerState::Activating,
            });
            id
        };

        let evicted = self.manager.evict_stale().await;
        info!(evicted, generation = %self.generation(), "Worker activating");

        {
            let mut registration = self.registration.write().await;
            registration.activate();
            let _ = self.event_tx.send(WorkerEvent::StateChange {
                worker: worker_id,
                state: WorkerState::Activated,
            });
        }

        let claimed = self.clients.write().await.claim(worker_id);
        for client_id in claimed {
            let _ = self
                .event_tx
                .send(WorkerEvent::ControllerChange { client_id });
        }

        if let Some(sync) = &self.sync {
            if let Err(e) = sync.sync_pending() {
                warn!(error = %e, "Sync delegate failed");
            }
        }

        Ok(())
    }

    /// Handle an intercepted fetch. Only an active worker serves requests.
    pub async fn handle_fetch(&self, request: Request) -> Result<ServedResponse, WorkerError> {
        {
            let registration = self.registration.read().await;
            if registration.active.is_none() {
                return Err(WorkerError::StateError("no active worker".to_string()));
            }
        }

        self.executor.handle(request).await
    }

    /// Handle a control message from the page.
    pub async fn handle_message(
        &self,
        message: ControlMessage,
    ) -> Result<Option<ControlReply>, WorkerError> {
        match message {
            ControlMessage::SkipWaiting => {
                let has_waiting = self.registration.read().await.waiting.is_some();
                if has_waiting {
                    self.handle_activate().await?;
                }
                Ok(None)
            }
            ControlMessage::GetVersion => Ok(Some(ControlReply::Version {
                version: self.generation().to_string(),
            })),
        }
    }
}
