//! The gateway façade the web layer talks to.
//!
//! Ties together the fetch client, the node registry, the cache store and the
//! background workers. Filesystem work is moved onto the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use nomad_client::{FetchClient, FetchConfig, FingerprintOutcome, FormFields, Transport};
use nomad_core::cache::{CacheDecision, CacheStats, NodeCacheStatus, SearchHit};
use nomad_core::{AppConfig, CacheSettings, CacheStore, CachedPage, Identity, NodeId, SettingsStore, SettingsUpdate};

use crate::GatewayError;
use crate::announce::{Admission, NodeRegistry, NodeView};
use crate::status::{ConnectionState, ConnectionStatus, StatusTracker};
use crate::workers::{CacheQueues, CacheWorker, WorkItem, WorkerPool};

const UNKNOWN_NODE_NAME: &str = "Unknown";

/// Registry entry with its current route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeListing {
    #[serde(flatten)]
    pub node: NodeView,
    pub hops: Option<u8>,
    pub next_hop: String,
}

/// What an announce led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// Synthetic name; nothing recorded.
    Rejected { name: String },
    Accepted { name: String, announce_count: u64, scheduled: Scheduled },
}

/// Cache work triggered by an accepted announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    FullRecache,
    AuxiliaryOnly,
    AlreadyCached,
    AutoCacheDisabled,
    /// The queue refused the item.
    Dropped,
}

/// Node queued by a manual refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshQueued {
    pub node_id: NodeId,
    pub node_name: String,
    pub message: String,
}

pub struct Gateway {
    fetch: Arc<FetchClient>,
    store: Arc<CacheStore>,
    settings: Arc<SettingsStore>,
    registry: NodeRegistry,
    status: StatusTracker,
    queues: CacheQueues,
    workers: Mutex<Option<WorkerPool>>,
}

impl Gateway {
    /// Build the gateway over a live transport and spawn the cache workers.
    ///
    /// Must be called from within a tokio runtime. The connection starts out
    /// `Connected` with the transport marked ready.
    pub fn start(config: &AppConfig, transport: Arc<dyn Transport>, identity: Identity) -> Result<Self, GatewayError> {
        config.validate()?;

        let store = Arc::new(CacheStore::with_primary_page(&config.cache_dir, &config.primary_page)?);
        let settings = Arc::new(SettingsStore::load(&config.settings_path)?);
        let fetch = Arc::new(FetchClient::new(transport, identity, FetchConfig::from(config)));

        let worker = Arc::new(CacheWorker {
            fetch: Arc::clone(&fetch),
            store: Arc::clone(&store),
            settings: Arc::clone(&settings),
        });
        let (queues, pool) = WorkerPool::spawn(worker, config.queue_capacity, config.worker_poll_interval());

        let status = StatusTracker::new(config.status_cache());
        status.set_transport_ready(true);
        status.set_state(ConnectionState::Connected);

        tracing::info!("Gateway started, caching into {}", store.root().display());
        Ok(Gateway {
            fetch,
            store,
            settings,
            registry: NodeRegistry::new(),
            status,
            queues,
            workers: Mutex::new(Some(pool)),
        })
    }

    /// Record an announce and schedule cache work for accepted nodes.
    pub fn handle_announce(&self, node: NodeId, identity: &Identity, app_data: Option<&[u8]>) -> AnnounceOutcome {
        tracing::debug!("Announce from {} (identity {})", node, NodeId::from_bytes(*identity.hash()));

        let record = match self.registry.register(node, app_data, Utc::now()) {
            Admission::Rejected(name) => return AnnounceOutcome::Rejected { name },
            Admission::Accepted(record) => record,
        };
        self.status.activate();

        let scheduled = self.schedule(node, &record.name);
        AnnounceOutcome::Accepted { name: record.name, announce_count: record.announce_count, scheduled }
    }

    fn schedule(&self, node: NodeId, name: &str) -> Scheduled {
        let settings = self.settings.get();
        if !settings.auto_cache_enabled {
            tracing::debug!("Auto caching disabled, not caching {}", name);
            return Scheduled::AutoCacheDisabled;
        }

        let decision = match self.store.inspect(&node) {
            Ok(inspection) => inspection.decision(settings.cache_additional_pages),
            Err(e) => {
                tracing::warn!(error = %e, "Could not inspect cache of {}", name);
                CacheDecision::FullRecache
            }
        };

        let item = WorkItem { node, name: name.to_string() };
        let queued = match decision {
            CacheDecision::FullRecache => self.queues.enqueue_primary(item).map(|()| Scheduled::FullRecache),
            CacheDecision::AuxiliaryOnly => self.queues.enqueue_auxiliary(item).map(|()| Scheduled::AuxiliaryOnly),
            CacheDecision::Skip => Ok(Scheduled::AlreadyCached),
        };
        queued.unwrap_or(Scheduled::Dropped)
    }

    /// Known nodes with hop count and next hop.
    pub fn nodes(&self) -> Vec<NodeListing> {
        let now = Utc::now();
        self.registry
            .list(now)
            .into_iter()
            .map(|node| {
                let path = self.fetch.path_info(&node.id);
                NodeListing { node, hops: path.hops, next_hop: path.next_hop }
            })
            .collect()
    }

    pub async fn fetch_page(&self, node: &str, page_path: &str, fields: Option<&FormFields>) -> Result<String, GatewayError> {
        Ok(self.fetch.fetch_page(node, page_path, fields).await?)
    }

    pub async fn fetch_file(&self, node: &str, file_path: &str) -> Result<Bytes, GatewayError> {
        Ok(self.fetch.fetch_file(node, file_path).await?)
    }

    pub async fn ping(&self, node: &str) -> Result<Duration, GatewayError> {
        Ok(self.fetch.ping(node).await?)
    }

    pub async fn send_fingerprint(&self, node: &str) -> Result<FingerprintOutcome, GatewayError> {
        Ok(self.fetch.send_fingerprint(node).await?)
    }

    /// Cached copy of a page, if any.
    pub async fn cached_page(&self, node: &str, page_path: &str) -> Result<Option<CachedPage>, GatewayError> {
        let node = NodeId::parse(node)?;
        let page_path = page_path.to_string();
        self.blocking(move |store| store.read(&node, &page_path)).await
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let snapshot = self.status.snapshot(Utc::now(), || self.registry.stats());
        ConnectionStatus { summary: snapshot.summary(), snapshot }
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.status.set_state(state);
    }

    pub fn set_transport_ready(&self, ready: bool) {
        self.status.set_transport_ready(ready);
    }

    /// Search cached pages, capped by the configured result limit.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, GatewayError> {
        let limit = self.settings.get().search_result_limit;
        let query = query.to_string();
        self.blocking(move |store| store.search(&query, limit, Utc::now())).await
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings.get()
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> Result<CacheSettings, GatewayError> {
        Ok(self.settings.update(update)?)
    }

    /// Queue a full re-cache of one node regardless of the auto-cache setting.
    pub fn refresh_node(&self, node: &str) -> Result<RefreshQueued, GatewayError> {
        let node = NodeId::parse(node)?;
        let name = self.resolve_name(&node);
        self.queues.enqueue_primary(WorkItem { node, name: name.clone() })?;

        let message = format!("Queued {name} for cache refresh");
        tracing::info!("{}", message);
        Ok(RefreshQueued { node_id: node, node_name: name, message })
    }

    /// Queue every known node for a full re-cache. Returns how many were queued.
    pub fn refresh_all(&self) -> usize {
        let mut queued = 0;
        for (node, name) in self.registry.ids() {
            if self.queues.enqueue_primary(WorkItem { node, name }).is_ok() {
                queued += 1;
            }
        }
        tracing::info!("Queued {} nodes for cache refresh", queued);
        queued
    }

    /// Queue every cached node for additional page caching.
    pub fn cache_additional_all(&self) -> Result<usize, GatewayError> {
        if !self.settings.get().cache_additional_pages {
            return Err(GatewayError::AuxiliaryDisabled);
        }

        let mut queued = 0;
        for node in self.store.list_nodes()? {
            let name = self.resolve_name(&node);
            if self.queues.enqueue_auxiliary(WorkItem { node, name }).is_ok() {
                queued += 1;
            }
        }
        tracing::info!("Queued {} nodes for additional page caching", queued);
        Ok(queued)
    }

    pub async fn clear_cache(&self) -> Result<(), GatewayError> {
        self.blocking(|store| store.clear_all()).await
    }

    /// Zip archive of the whole cache tree.
    pub async fn export_cache(&self) -> Result<Vec<u8>, GatewayError> {
        self.blocking(|store| store.export_archive()).await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, GatewayError> {
        self.blocking(|store| store.stats()).await
    }

    pub fn node_cache_status(&self, node: &str) -> Result<NodeCacheStatus, GatewayError> {
        let node = NodeId::parse(node)?;
        Ok(self.store.node_status(&node, Utc::now()))
    }

    /// Stop the workers and mark the connection as shut down.
    pub async fn shutdown(&self) {
        self.status.set_state(ConnectionState::Shutdown);
        let pool = self.workers.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }

    fn resolve_name(&self, node: &NodeId) -> String {
        self.registry
            .lookup_name(node)
            .or_else(|| self.store.node_name(node))
            .unwrap_or_else(|| UNKNOWN_NODE_NAME.to_string())
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&CacheStore) -> Result<T, nomad_core::Error> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || op(&store)).await??)
    }
}
