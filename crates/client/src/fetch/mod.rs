//! Awaitable fetch pipeline over the callback-driven link protocol.
//!
//! ### Request flow
//! - Normalize the destination (`<`, `>` and `:` are stripped)
//! - Request a path if none is known and poll until one appears or the budget runs out
//! - Recall the destination identity
//! - Open a link, issue the request once it is established, and wait for the
//!   first continuation to fire (bounded by a per-kind timeout)
//!
//! ### Link reuse
//! - Page fetches keep the link of every successful request, keyed by destination
//! - A cached link is reused while active and dropped as soon as it is not
//! - Session fields recorded on a link (identity fingerprint) ride along with later requests
//! - File downloads and pings always use a fresh link
//!
//! A remote failure is `RequestFailed` for pages and pings and an empty body
//! for file downloads.

mod completion;
pub mod form;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};

use nomad_core::{AppConfig, Error, Identity, NodeId};

use crate::response::{Response, decode_page};
use crate::transport::{FormFields, Link, LinkStatus, Transport};
use completion::Completion;

pub use form::{prefix_fields, request_data};

const LXMF_APP_NAME: &str = "lxmf";
const LXMF_DELIVERY_ASPECT: &str = "delivery";
const SESSION_DEST_FIELD: &str = "dest";

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Page requested by pings and link bootstrapping (default: "/page/index.mu")
    pub primary_page: String,

    /// Page fetch timeout (default: 30s)
    pub page_timeout: Duration,

    /// File download timeout (default: 60s)
    pub file_timeout: Duration,

    /// Ping timeout (default: 15s)
    pub ping_timeout: Duration,

    /// Budget for path discovery (default: 30s)
    pub path_timeout: Duration,

    /// Interval between path checks while discovering (default: 100ms)
    pub path_poll_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            primary_page: "/page/index.mu".to_string(),
            page_timeout: Duration::from_secs(30),
            file_timeout: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(15),
            path_timeout: Duration::from_secs(30),
            path_poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            primary_page: config.primary_page.clone(),
            page_timeout: config.page_timeout(),
            file_timeout: config.file_timeout(),
            ping_timeout: config.ping_timeout(),
            path_timeout: config.path_timeout(),
            path_poll_interval: config.path_poll_interval(),
        }
    }
}

/// Route summary for a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathInfo {
    pub hops: Option<u8>,
    pub next_hop: String,
}

/// Result of revealing the local identity to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintOutcome {
    pub message: String,
    pub reused_link: bool,
    pub lxmf_destination: NodeId,
}

enum Delivery {
    Data(Vec<u8>),
    Failed,
}

struct LinkEntry {
    link: Arc<dyn Link>,
    session: FormFields,
}

/// Fetch client multiplexing callers over the transport's links.
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    identity: Identity,
    config: FetchConfig,
    links: Mutex<HashMap<NodeId, LinkEntry>>,
}

impl FetchClient {
    /// Create a fetch client that identifies as `identity` when asked to.
    pub fn new(transport: Arc<dyn Transport>, identity: Identity, config: FetchConfig) -> Self {
        Self { transport, identity, config, links: Mutex::new(HashMap::new()) }
    }

    /// Fetch a page as text.
    ///
    /// Non-UTF-8 pages come back as a `Binary data: ...` preview. An empty
    /// delivery is an empty page.
    pub async fn fetch_page(&self, node: &str, page_path: &str, fields: Option<&FormFields>) -> Result<String, Error> {
        let (id, identity) = self.resolve(node).await?;

        if let Some((link, session)) = self.active_link(&id) {
            tracing::debug!("Reusing cached link to {} for {}", id.short_hex(), page_path);
            let (completion, rx) = Completion::channel();
            issue(link.as_ref(), page_path, request_data(fields, &session), completion);
            let bytes = self.await_delivery(rx, self.config.page_timeout, page_path, &id).await?;
            return Ok(decode_page(bytes));
        }

        let data = request_data(fields, &FormFields::new());
        let (link, bytes) = self.request_over_new_link(&id, &identity, page_path, data, self.config.page_timeout).await?;

        self.links.lock().insert(id, LinkEntry { link, session: FormFields::new() });
        tracing::debug!("Fetched {} from {} ({} bytes), link cached", page_path, id.short_hex(), bytes.len());

        Ok(decode_page(bytes))
    }

    /// Download a file as raw bytes over a fresh link.
    ///
    /// A download the remote reports as failed is an empty file.
    pub async fn fetch_file(&self, node: &str, file_path: &str) -> Result<Bytes, Error> {
        let (id, identity) = self.resolve(node).await?;
        let bytes = match self.request_over_new_link(&id, &identity, file_path, None, self.config.file_timeout).await {
            Ok((_link, bytes)) => bytes,
            Err(Error::RequestFailed(reason)) => {
                tracing::debug!(reason = %reason, "Download of {} from {} failed", file_path, id.short_hex());
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("Downloaded {} from {} ({} bytes)", file_path, id.short_hex(), bytes.len());
        Ok(Bytes::from(bytes))
    }

    /// Round trip from opening a fresh link to the primary page's response.
    pub async fn ping(&self, node: &str) -> Result<Duration, Error> {
        let (id, identity) = self.resolve(node).await?;
        let started = Instant::now();
        self.request_over_new_link(&id, &identity, &self.config.primary_page, None, self.config.ping_timeout).await?;

        let rtt = started.elapsed();
        tracing::debug!("Pong from {} in {:.2}s", id.short_hex(), rtt.as_secs_f64());
        Ok(rtt)
    }

    /// Reveal the local identity to `node` over a cached link.
    ///
    /// Without an active cached link the primary page is fetched first to
    /// create one. The LXMF delivery destination is then recorded as a session
    /// field sent with every later request on that link.
    pub async fn send_fingerprint(&self, node: &str) -> Result<FingerprintOutcome, Error> {
        let id = NodeId::parse(node)?;
        let reused_link = self.active_link(&id).is_some();

        if !reused_link {
            let primary = self.config.primary_page.clone();
            if let Err(e) = self.fetch_page(node, &primary, None).await {
                return Err(Error::LinkFailed(format!("could not create link to {id}: {e}")));
            }
        }

        let Some((link, _)) = self.active_link(&id) else {
            return Err(Error::LinkFailed(format!("no active link to {id}")));
        };

        link.identify(&self.identity);
        let lxmf_destination = self.identity.destination_hash(LXMF_APP_NAME, &[LXMF_DELIVERY_ASPECT]);
        if let Some(entry) = self.links.lock().get_mut(&id) {
            entry.session.insert(SESSION_DEST_FIELD.to_string(), lxmf_destination.to_hex());
        }

        tracing::info!("Identity established with {} (lxmf dest {})", id.short_hex(), lxmf_destination);

        let message = if reused_link {
            "Identity established on existing link"
        } else {
            "Identity established on new link"
        };
        Ok(FingerprintOutcome { message: message.to_string(), reused_link, lxmf_destination })
    }

    /// Hop count and next hop description for `node`.
    pub fn path_info(&self, node: &NodeId) -> PathInfo {
        let hops = self.transport.hops_to(node);
        let next_hop = match self.transport.next_hop(node) {
            Some(via) => match self.transport.next_hop_interface(node) {
                Some(interface) => format!("via {interface}"),
                None => format!("via {}...", &via.to_hex()[..16]),
            },
            None => "Unknown".to_string(),
        };
        PathInfo { hops, next_hop }
    }

    pub fn cached_link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Drop the cached link to `node`. Returns whether one was cached.
    pub fn forget_link(&self, node: &NodeId) -> bool {
        self.links.lock().remove(node).is_some()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn local_identity(&self) -> &Identity {
        &self.identity
    }

    async fn resolve(&self, node: &str) -> Result<(NodeId, Identity), Error> {
        let id = NodeId::parse(node)?;
        self.await_path(&id).await?;

        let identity = self
            .transport
            .recall_identity(&id)
            .ok_or_else(|| Error::NoIdentity(format!("could not recall identity for {id}")))?;
        Ok((id, identity))
    }

    async fn await_path(&self, id: &NodeId) -> Result<(), Error> {
        if self.transport.has_path(id) {
            return Ok(());
        }

        tracing::debug!("Requesting path to {}", id.short_hex());
        self.transport.request_path(id);
        let deadline = Instant::now() + self.config.path_timeout;

        loop {
            sleep(self.config.path_poll_interval).await;
            if self.transport.has_path(id) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::NoPath(format!(
                    "no path to {id} after {}ms",
                    self.config.path_timeout.as_millis()
                )));
            }
        }
    }

    /// Cached link to `id` if it is still active. Inactive links are evicted.
    fn active_link(&self, id: &NodeId) -> Option<(Arc<dyn Link>, FormFields)> {
        let mut links = self.links.lock();
        let entry = links.get(id)?;
        if entry.link.status() == LinkStatus::Active {
            return Some((Arc::clone(&entry.link), entry.session.clone()));
        }

        links.remove(id);
        tracing::debug!("Evicted inactive cached link to {}", id.short_hex());
        None
    }

    async fn request_over_new_link(
        &self, id: &NodeId, identity: &Identity, path: &str, data: Option<FormFields>, limit: Duration,
    ) -> Result<(Arc<dyn Link>, Vec<u8>), Error> {
        let link = self.transport.open_link(id, identity)?;
        let (completion, rx) = Completion::channel();

        let request_path = path.to_string();
        link.on_established(Box::new(move |link: &dyn Link| {
            tracing::debug!("Link established, requesting {}", request_path);
            issue(link, &request_path, data, completion);
        }));

        let bytes = self.await_delivery(rx, limit, path, id).await?;
        Ok((link, bytes))
    }

    async fn await_delivery(
        &self, rx: oneshot::Receiver<Delivery>, limit: Duration, path: &str, id: &NodeId,
    ) -> Result<Vec<u8>, Error> {
        match timeout(limit, rx).await {
            Ok(Ok(Delivery::Data(bytes))) => Ok(bytes),
            Ok(Ok(Delivery::Failed)) => Err(Error::RequestFailed(format!("{path} on {id}"))),
            Ok(Err(_)) => Err(Error::LinkFailed(format!("link to {id} closed before {path} completed"))),
            Err(_) => {
                tracing::debug!("Request for {} on {} timed out after {}ms", path, id.short_hex(), limit.as_millis());
                Err(Error::Timeout(format!("{path} on {id} after {}ms", limit.as_millis())))
            }
        }
    }
}

/// Send a request whose continuations both feed `completion`.
fn issue(link: &dyn Link, path: &str, data: Option<FormFields>, completion: Completion<Delivery>) {
    let failed = completion.clone();
    link.request(
        path,
        data,
        Box::new(move |response: Response| {
            completion.fire(Delivery::Data(response.into_bytes()));
        }),
        Box::new(move || {
            tracing::debug!("Remote reported request failure");
            failed.fire(Delivery::Failed);
        }),
    );
}
