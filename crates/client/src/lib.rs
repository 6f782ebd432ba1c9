//! Client code for the node gateway.
//!
//! This crate provides the awaitable fetch pipeline over the overlay network's
//! callback-driven link protocol, the transport seam it drives, and response
//! normalization shared by the gateway.

pub mod fetch;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod response;
pub mod transport;

pub use fetch::{FetchClient, FetchConfig, FingerprintOutcome, PathInfo};
pub use response::{Chunk, Response};
pub use transport::{FormFields, Link, LinkStatus, Transport};
