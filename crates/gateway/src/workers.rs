//! Background cache workers.
//!
//! Two long-lived tasks drain their own bounded queue:
//! - the primary worker fetches a node's primary page, persists it, hands the
//!   node on to the auxiliary queue when enabled, then runs eviction
//! - the auxiliary worker walks a fixed list of well-known pages and persists
//!   every non-empty one
//!
//! Each item runs in its own task so a panic is logged and the loop carries on.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use nomad_client::FetchClient;
use nomad_core::{CacheStore, NodeId, SettingsStore};

use crate::GatewayError;

/// Well-known pages fetched by the auxiliary worker, in order.
pub const AUXILIARY_PAGES: [&str; 14] = [
    "/page/home.mu",
    "/page/about.mu",
    "/page/menu.mu",
    "/page/info.mu",
    "/page/contact.mu",
    "/page/help.mu",
    "/page/messageboard/messageboard.mu",
    "/page/messageboard.mu",
    "/page/links.mu",
    "/page/faq.mu",
    "/page/files.mu",
    "/page/boards.mu",
    "/page/nomadForum/index.mu",
    "/page/archive.mu",
];

/// A node waiting to be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub node: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Primary,
    Auxiliary,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Primary => f.write_str("primary"),
            QueueKind::Auxiliary => f.write_str("auxiliary"),
        }
    }
}

/// Producer side of the two cache queues.
#[derive(Clone)]
pub struct CacheQueues {
    primary: mpsc::Sender<WorkItem>,
    auxiliary: mpsc::Sender<WorkItem>,
}

impl CacheQueues {
    pub fn enqueue_primary(&self, item: WorkItem) -> Result<(), GatewayError> {
        offer(&self.primary, QueueKind::Primary, item)
    }

    pub fn enqueue_auxiliary(&self, item: WorkItem) -> Result<(), GatewayError> {
        offer(&self.auxiliary, QueueKind::Auxiliary, item)
    }
}

fn offer(queue: &mpsc::Sender<WorkItem>, kind: QueueKind, item: WorkItem) -> Result<(), GatewayError> {
    match queue.try_send(item) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(item)) => {
            tracing::warn!(node = %item.node, "Dropping {} cache item for {}: queue full", kind, item.name);
            Err(GatewayError::QueueFull(format!("{kind} queue is full")))
        }
        Err(TrySendError::Closed(item)) => {
            tracing::warn!(node = %item.node, "Dropping {} cache item for {}: workers stopped", kind, item.name);
            Err(GatewayError::QueueFull(format!("{kind} queue is closed")))
        }
    }
}

/// Shared state the workers operate on.
pub struct CacheWorker {
    pub fetch: Arc<FetchClient>,
    pub store: Arc<CacheStore>,
    pub settings: Arc<SettingsStore>,
}

impl CacheWorker {
    async fn cache_primary(&self, item: WorkItem, queues: &CacheQueues) {
        let page = self.store.primary_page().to_string();
        let content = match self.fetch.fetch_page(&item.node.to_hex(), &page, None).await {
            Ok(content) => content,
            Err(e) if e.is_transient() => {
                tracing::info!(error = %e, node = %item.node, "Primary page of {} unreachable for now", item.name);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, node = %item.node, "Failed to cache primary page of {}", item.name);
                return;
            }
        };

        if let Err(e) = self.persist(item.node, page, content, item.name.clone()).await {
            tracing::error!(error = %e, node = %item.node, "Failed to write primary page of {}", item.name);
            return;
        }
        tracing::info!("Cached primary page of {} ({})", item.name, item.node);

        if self.settings.get().cache_additional_pages {
            let _ = queues.enqueue_auxiliary(item);
        }
        self.evict().await;
    }

    async fn cache_auxiliary(&self, item: WorkItem) {
        if !self.settings.get().cache_additional_pages {
            tracing::debug!("Additional page caching disabled, skipping {}", item.name);
            return;
        }

        let node = item.node.to_hex();
        let mut written = 0usize;
        for page in AUXILIARY_PAGES {
            match self.fetch.fetch_page(&node, page, None).await {
                Ok(content) if !content.trim().is_empty() => {
                    match self.persist(item.node, page.to_string(), content, item.name.clone()).await {
                        Ok(()) => written += 1,
                        Err(e) => tracing::warn!(error = %e, "Failed to write {} of {}", page, item.name),
                    }
                }
                Ok(_) => tracing::debug!("Empty {} on {}", page, item.name),
                Err(e) => tracing::debug!("No {} on {}: {}", page, item.name, e),
            }
        }

        tracing::info!("Cached {} additional pages of {} ({})", written, item.name, item.node);
        if written > 0 {
            self.evict().await;
        }
    }

    async fn persist(&self, node: NodeId, page: String, content: String, name: String) -> Result<(), GatewayError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.write(&node, &page, content, &name)).await??;
        Ok(())
    }

    async fn evict(&self) {
        let store = Arc::clone(&self.store);
        let settings = self.settings.get();
        match tokio::task::spawn_blocking(move || store.run_eviction(&settings, Utc::now())).await {
            Ok(Ok(report)) if !report.is_empty() => {
                tracing::info!("Eviction removed {} nodes, freed {} bytes", report.removed.len(), report.bytes_freed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Eviction failed"),
            Err(e) => tracing::error!(error = %e, "Eviction task failed"),
        }
    }
}

/// Handles to the running worker tasks.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn both workers onto the current runtime.
    pub fn spawn(worker: Arc<CacheWorker>, capacity: usize, poll: Duration) -> (CacheQueues, WorkerPool) {
        let (primary_tx, primary_rx) = mpsc::channel(capacity);
        let (auxiliary_tx, auxiliary_rx) = mpsc::channel(capacity);
        let queues = CacheQueues { primary: primary_tx, auxiliary: auxiliary_tx };
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = vec![
            tokio::spawn(drain(
                QueueKind::Primary,
                primary_rx,
                Arc::clone(&worker),
                queues.clone(),
                poll,
                Arc::clone(&shutdown),
            )),
            tokio::spawn(drain(
                QueueKind::Auxiliary,
                auxiliary_rx,
                worker,
                queues.clone(),
                poll,
                Arc::clone(&shutdown),
            )),
        ];

        (queues, WorkerPool { shutdown, handles })
    }

    /// Signal the workers and wait for them to finish their current item.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cache worker exited abnormally");
            }
        }
        tracing::info!("Cache workers stopped");
    }
}

async fn drain(
    kind: QueueKind, mut queue: mpsc::Receiver<WorkItem>, worker: Arc<CacheWorker>, queues: CacheQueues,
    poll: Duration, shutdown: Arc<AtomicBool>,
) {
    tracing::info!("Started {} cache worker", kind);
    while !shutdown.load(Ordering::SeqCst) {
        let item = match timeout(poll, queue.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => continue,
        };

        tracing::debug!("Processing {} cache item for {}", kind, item.name);
        let worker = Arc::clone(&worker);
        let queues = queues.clone();
        let task = tokio::spawn(async move {
            match kind {
                QueueKind::Primary => worker.cache_primary(item, &queues).await,
                QueueKind::Auxiliary => worker.cache_auxiliary(item).await,
            }
        });
        if let Err(e) = task.await {
            tracing::error!(error = %e, "{} cache task failed", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nomad_client::FetchConfig;
    use nomad_client::mock::{MockTransport, Reply};
    use nomad_core::{Identity, SettingsUpdate};

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 16])
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        transport: Arc<MockTransport>,
        worker: Arc<CacheWorker>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let fetch = FetchClient::new(transport.clone(), Identity::from_public_key(b"local".to_vec()), FetchConfig::default());
        let worker = Arc::new(CacheWorker {
            fetch: Arc::new(fetch),
            store: Arc::new(CacheStore::open(dir.path().join("nodes")).unwrap()),
            settings: Arc::new(SettingsStore::load(dir.path().join("settings.json")).unwrap()),
        });
        Fixture { _dir: dir, transport, worker }
    }

    fn queues(capacity: usize) -> (CacheQueues, mpsc::Receiver<WorkItem>, mpsc::Receiver<WorkItem>) {
        let (primary, primary_rx) = mpsc::channel(capacity);
        let (auxiliary, auxiliary_rx) = mpsc::channel(capacity);
        (CacheQueues { primary, auxiliary }, primary_rx, auxiliary_rx)
    }

    #[test]
    fn test_full_queue_drops_item() {
        let (queues, _primary_rx, _auxiliary_rx) = queues(1);
        let item = WorkItem { node: node(1), name: "Alpha".into() };
        assert!(queues.enqueue_primary(item.clone()).is_ok());
        assert!(matches!(queues.enqueue_primary(item), Err(GatewayError::QueueFull(_))));
    }

    #[test]
    fn test_closed_queue_rejects() {
        let (queues, primary_rx, _auxiliary_rx) = queues(4);
        drop(primary_rx);
        let item = WorkItem { node: node(1), name: "Alpha".into() };
        assert!(matches!(queues.enqueue_primary(item), Err(GatewayError::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_primary_writes_and_forwards() {
        let f = fixture();
        f.transport.add_node(node(1), Identity::from_public_key(b"alpha".to_vec()));
        f.transport.set_reply(node(1), "/page/index.mu", Reply::text("Welcome to Alpha"));
        f.worker.settings.update(SettingsUpdate::CacheAdditional(true)).unwrap();

        let (queues, _primary_rx, mut auxiliary_rx) = queues(4);
        f.worker.cache_primary(WorkItem { node: node(1), name: "Alpha".into() }, &queues).await;

        let page = f.worker.store.read(&node(1), "/page/index.mu").unwrap().unwrap();
        assert_eq!(page.content, "Welcome to Alpha");
        assert_eq!(page.node_name.as_deref(), Some("Alpha"));
        assert_eq!(auxiliary_rx.try_recv().unwrap().name, "Alpha");
    }

    #[tokio::test]
    async fn test_primary_failure_writes_nothing() {
        let f = fixture();
        f.transport.add_node(node(2), Identity::from_public_key(b"bravo".to_vec()));

        let (queues, _primary_rx, mut auxiliary_rx) = queues(4);
        f.worker.cache_primary(WorkItem { node: node(2), name: "Bravo".into() }, &queues).await;

        assert!(!f.worker.store.node_dir(&node(2)).exists());
        assert!(auxiliary_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_auxiliary_skips_empty_and_failed() {
        let f = fixture();
        f.transport.add_node(node(3), Identity::from_public_key(b"charlie".to_vec()));
        f.transport.set_reply(node(3), "/page/about.mu", Reply::text("About Charlie"));
        f.transport.set_reply(node(3), "/page/home.mu", Reply::text("   "));
        f.transport.set_reply(node(3), "/page/nomadForum/index.mu", Reply::text("Forum"));
        f.worker.settings.update(SettingsUpdate::CacheAdditional(true)).unwrap();

        f.worker.cache_auxiliary(WorkItem { node: node(3), name: "Charlie".into() }).await;

        let pages = f.worker.store.auxiliary_pages(&node(3)).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages.contains(&"/page/about.mu".to_string()));
        assert!(pages.contains(&"/page/nomadForum/index.mu".to_string()));
        assert_eq!(f.transport.requests().len(), AUXILIARY_PAGES.len());
    }

    #[tokio::test]
    async fn test_auxiliary_disabled_fetches_nothing() {
        let f = fixture();
        f.transport.add_node(node(4), Identity::from_public_key(b"delta".to_vec()));

        f.worker.cache_auxiliary(WorkItem { node: node(4), name: "Delta".into() }).await;
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_pool_drains_and_stops() {
        let f = fixture();
        f.transport.add_node(node(5), Identity::from_public_key(b"echo".to_vec()));
        f.transport.set_reply(node(5), "/page/index.mu", Reply::text("Echo station home"));

        let (queues, pool) = WorkerPool::spawn(Arc::clone(&f.worker), 8, Duration::from_millis(20));
        queues.enqueue_primary(WorkItem { node: node(5), name: "Echo".into() }).unwrap();

        for _ in 0..200 {
            if f.worker.store.read(&node(5), "/page/index.mu").unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.worker.store.read(&node(5), "/page/index.mu").unwrap().is_some());

        pool.shutdown().await;
    }
}
