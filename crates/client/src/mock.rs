//! Scripted in-memory transport.
//!
//! Replies fire synchronously inside [`Link::request`], so tests do not depend
//! on scheduling. `Reply::Silent` parks the continuations until
//! [`MockTransport::respond_pending`] releases them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use nomad_core::{Error, Identity, NodeId};

use crate::response::{Chunk, Response};
use crate::transport::{EstablishedCallback, FailureCallback, FormFields, Link, LinkStatus, ResponseCallback, Transport};

/// Scripted answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Chunks(Vec<Chunk>),
    /// A stream whose first read fails.
    BrokenStream,
    Fail,
    Silent,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    fn response(&self) -> Option<Response> {
        match self {
            Reply::Empty => Some(Response::Empty),
            Reply::Bytes(bytes) => Some(Response::Bytes(bytes.clone())),
            Reply::Text(text) => Some(Response::Text(text.clone())),
            Reply::Chunks(chunks) => Some(Response::Chunks(chunks.clone())),
            Reply::BrokenStream => Some(Response::Stream(Box::new(BrokenReader))),
            Reply::Fail | Reply::Silent => None,
        }
    }
}

struct BrokenReader;

impl std::io::Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("connection reset"))
    }
}

/// A request as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub destination: NodeId,
    pub path: String,
    pub data: Option<FormFields>,
    pub link_id: usize,
}

struct Parked {
    on_response: ResponseCallback,
    on_failure: FailureCallback,
}

#[derive(Default)]
struct MockState {
    paths: HashSet<NodeId>,
    discoverable: HashSet<NodeId>,
    path_requests: usize,
    identities: HashMap<NodeId, Identity>,
    replies: HashMap<(NodeId, String), Reply>,
    requests: Vec<RecordedRequest>,
    links: Vec<Arc<MockLink>>,
    hold_links: bool,
    unestablished: Vec<(usize, EstablishedCallback)>,
    parked: Vec<Parked>,
    identified: Vec<(NodeId, Identity)>,
    hops: HashMap<NodeId, u8>,
    next_hops: HashMap<NodeId, (NodeId, Option<String>)>,
}

/// In-memory [`Transport`] driven entirely by test setup.
#[derive(Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `destination` reachable with a known identity.
    pub fn add_node(&self, destination: NodeId, identity: Identity) {
        let mut state = self.state.lock();
        state.paths.insert(destination);
        state.identities.insert(destination, identity);
    }

    pub fn add_path(&self, destination: NodeId) {
        self.state.lock().paths.insert(destination);
    }

    pub fn set_identity(&self, destination: NodeId, identity: Identity) {
        self.state.lock().identities.insert(destination, identity);
    }

    /// A path to `destination` appears as soon as one is requested.
    pub fn make_discoverable(&self, destination: NodeId) {
        self.state.lock().discoverable.insert(destination);
    }

    pub fn set_reply(&self, destination: NodeId, path: &str, reply: Reply) {
        self.state.lock().replies.insert((destination, path.to_string()), reply);
    }

    /// While set, new links never establish on their own.
    pub fn set_hold_links(&self, hold: bool) {
        self.state.lock().hold_links = hold;
    }

    pub fn set_hops(&self, destination: NodeId, hops: u8) {
        self.state.lock().hops.insert(destination, hops);
    }

    pub fn set_next_hop(&self, destination: NodeId, via: NodeId, interface: Option<&str>) {
        self.state.lock().next_hops.insert(destination, (via, interface.map(str::to_string)));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn links_opened(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn path_requests(&self) -> usize {
        self.state.lock().path_requests
    }

    /// Identities revealed over links, in order.
    pub fn identified(&self) -> Vec<(NodeId, Identity)> {
        self.state.lock().identified.clone()
    }

    /// Tear down every link opened so far.
    pub fn close_links(&self) {
        let links = self.state.lock().links.clone();
        for link in links {
            *link.status.lock() = LinkStatus::Closed;
        }
    }

    /// Establish links held back by [`set_hold_links`](Self::set_hold_links).
    pub fn release_links(&self) {
        let (held, links) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.unestablished), state.links.clone())
        };
        for (id, callback) in held {
            if let Some(link) = links.iter().find(|l| l.id == id) {
                *link.status.lock() = LinkStatus::Active;
                callback(link.as_ref());
            }
        }
    }

    /// Answer every parked request with `reply`. Returns how many were answered.
    pub fn respond_pending(&self, reply: Reply) -> usize {
        let parked = std::mem::take(&mut self.state.lock().parked);
        let count = parked.len();
        for request in parked {
            match reply.response() {
                Some(response) => (request.on_response)(response),
                None => (request.on_failure)(),
            }
        }
        count
    }
}

impl Transport for MockTransport {
    fn has_path(&self, destination: &NodeId) -> bool {
        self.state.lock().paths.contains(destination)
    }

    fn request_path(&self, destination: &NodeId) {
        let mut state = self.state.lock();
        state.path_requests += 1;
        if state.discoverable.contains(destination) {
            state.paths.insert(*destination);
        }
    }

    fn recall_identity(&self, destination: &NodeId) -> Option<Identity> {
        self.state.lock().identities.get(destination).cloned()
    }

    fn open_link(&self, destination: &NodeId, _identity: &Identity) -> Result<Arc<dyn Link>, Error> {
        let mut state = self.state.lock();
        let link = Arc::new(MockLink {
            id: state.links.len(),
            destination: *destination,
            status: Mutex::new(LinkStatus::Pending),
            state: Arc::downgrade(&self.state),
        });
        state.links.push(Arc::clone(&link));
        Ok(link)
    }

    fn hops_to(&self, destination: &NodeId) -> Option<u8> {
        self.state.lock().hops.get(destination).copied()
    }

    fn next_hop(&self, destination: &NodeId) -> Option<NodeId> {
        self.state.lock().next_hops.get(destination).map(|(via, _)| *via)
    }

    fn next_hop_interface(&self, destination: &NodeId) -> Option<String> {
        self.state.lock().next_hops.get(destination).and_then(|(_, iface)| iface.clone())
    }
}

/// Link handed out by [`MockTransport`].
pub struct MockLink {
    id: usize,
    destination: NodeId,
    status: Mutex<LinkStatus>,
    state: Weak<Mutex<MockState>>,
}

impl Link for MockLink {
    fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    fn on_established(&self, callback: EstablishedCallback) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        {
            let mut state = state.lock();
            if state.hold_links {
                state.unestablished.push((self.id, callback));
                return;
            }
        }
        *self.status.lock() = LinkStatus::Active;
        callback(self);
    }

    fn request(&self, path: &str, data: Option<FormFields>, on_response: ResponseCallback, on_failure: FailureCallback) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let reply = {
            let mut state = state.lock();
            state.requests.push(RecordedRequest {
                destination: self.destination,
                path: path.to_string(),
                data,
                link_id: self.id,
            });
            let reply = state.replies.get(&(self.destination, path.to_string())).cloned().unwrap_or(Reply::Fail);
            if reply == Reply::Silent {
                state.parked.push(Parked { on_response, on_failure });
                return;
            }
            reply
        };

        match reply.response() {
            Some(response) => on_response(response),
            None => on_failure(),
        }
    }

    fn identify(&self, identity: &Identity) {
        if let Some(state) = self.state.upgrade() {
            state.lock().identified.push((self.destination, identity.clone()));
        }
    }
}
