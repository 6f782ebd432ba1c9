//! Core types and shared functionality for the node gateway.
//!
//! This crate provides:
//! - Destination identifiers and identities
//! - Disk-backed page cache with eviction and full-text search
//! - Persisted cache settings
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod settings;

pub use cache::{CacheStore, CachedPage};
pub use config::{AppConfig, ConfigError, LogFormat};
pub use error::Error;
pub use identity::{Identity, NODE_ID_LEN, NodeId};
pub use settings::{CacheSettings, SettingsStore, SettingsUpdate};
