//! Seam to the overlay network transport.
//!
//! The transport owns path discovery, identity recall and link establishment.
//! Link continuations fire on a transport thread at a time of the transport's
//! choosing; callers must not assume they ever fire.

use std::collections::BTreeMap;
use std::sync::Arc;

use nomad_core::{Error, Identity, NodeId};

use crate::response::Response;

/// Request fields sent alongside a page request.
pub type FormFields = BTreeMap<String, String>;

/// Continuation receiving the remote response.
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send>;

/// Continuation fired when the remote side reports a failed request.
pub type FailureCallback = Box<dyn FnOnce() + Send>;

/// Continuation fired once a link is ready for requests.
pub type EstablishedCallback = Box<dyn FnOnce(&dyn Link) + Send>;

/// Lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Pending,
    Active,
    Closed,
}

/// An encrypted session with one remote destination.
pub trait Link: Send + Sync {
    fn status(&self) -> LinkStatus;

    /// Register the continuation to run once the link is established.
    ///
    /// If the link is already active the continuation may run immediately on the
    /// calling thread.
    fn on_established(&self, callback: EstablishedCallback);

    /// Issue a request over the link. Exactly one of the two continuations fires,
    /// or neither if the link is torn down first.
    fn request(&self, path: &str, data: Option<FormFields>, on_response: ResponseCallback, on_failure: FailureCallback);

    /// Reveal the local identity to the remote side.
    fn identify(&self, identity: &Identity);
}

/// Routing and link factory of the overlay network.
pub trait Transport: Send + Sync {
    fn has_path(&self, destination: &NodeId) -> bool;

    /// Ask the network for a path. Returns immediately.
    fn request_path(&self, destination: &NodeId);

    fn recall_identity(&self, destination: &NodeId) -> Option<Identity>;

    /// Start establishing a link to `destination`, owned by `identity`.
    fn open_link(&self, destination: &NodeId, identity: &Identity) -> Result<Arc<dyn Link>, Error>;

    fn hops_to(&self, destination: &NodeId) -> Option<u8>;

    fn next_hop(&self, destination: &NodeId) -> Option<NodeId>;

    /// Name of the interface the next hop is reached through.
    fn next_hop_interface(&self, destination: &NodeId) -> Option<String>;
}
