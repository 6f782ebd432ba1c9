//! Node gateway: announce ingestion, background caching and the façade
//! served to the web layer.
//!
//! Build a [`Gateway`] with [`Gateway::start`] over a [`nomad_client::Transport`]
//! and feed it announces through [`Gateway::handle_announce`].

pub mod announce;
pub mod error;
pub mod gateway;
pub mod status;
pub mod telemetry;
pub mod workers;

pub use announce::{NodeRegistry, NodeView};
pub use error::{ErrorBody, GatewayError};
pub use gateway::{AnnounceOutcome, Gateway, NodeListing, RefreshQueued, Scheduled};
pub use status::{ConnectionState, ConnectionStatus, ConnectionSummary, Health, StatusSnapshot};
pub use workers::{AUXILIARY_PAGES, WorkItem};
