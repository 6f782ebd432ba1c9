//! Disk-backed cache of pages fetched from remote nodes.
//!
//! Every node owns one directory under the cache root, named by its
//! destination hash:
//!
//! - `index.mu` holds the primary page
//! - `node_name.txt` holds the announced display name
//! - `cached_at.txt` holds the time of the last primary write
//! - `pages/*.mu` holds auxiliary pages
//!
//! Eviction, search and statistics are implemented as further `impl CacheStore`
//! blocks in their own modules.

pub mod eviction;
pub mod freshness;
pub mod search;
pub mod stats;
pub mod store;

pub use crate::Error;

pub use eviction::EvictionReport;
pub use freshness::Freshness;
pub use search::SearchHit;
pub use stats::CacheStats;
pub use store::{CacheDecision, CacheStore, CachedPage, NodeCacheStatus, NodeInspection};
