//! Announce ingestion and the in-memory node registry.
//!
//! Announce payloads carry a display name either as raw UTF-8 or MessagePack.
//! Nodes whose name cannot be recovered get a synthetic placeholder and are
//! kept out of the registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use nomad_core::NodeId;

use crate::status::AnnounceStats;

const EMPTY_PREFIX: &str = "EmptyNode_";
const BINARY_PREFIX: &str = "BinaryNode_";
const GENERIC_PREFIX: &str = "Node_";
const UNKNOWN_NAME: &str = "UNKNOWN";

/// Recover a display name from announce app data.
pub fn decode_node_name(app_data: Option<&[u8]>, node: &NodeId) -> String {
    let short = node.short_hex();
    let Some(data) = app_data.filter(|data| !data.is_empty()) else {
        return format!("{EMPTY_PREFIX}{short}");
    };

    if let Ok(text) = std::str::from_utf8(data) {
        return text.to_string();
    }
    if let Ok(name) = rmp_serde::from_slice::<String>(data) {
        return name;
    }
    if rmp_serde::from_slice::<serde::de::IgnoredAny>(data).is_ok() {
        return format!("{GENERIC_PREFIX}{short}");
    }
    format!("{BINARY_PREFIX}{short}")
}

/// Names that never enter the registry.
pub fn is_synthetic_name(name: &str) -> bool {
    name.is_empty() || name.starts_with(EMPTY_PREFIX) || name.starts_with(BINARY_PREFIX) || name == UNKNOWN_NAME
}

/// Coarse relative age: "Just now", "5m ago", "2h ago".
pub fn relative_time(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    if secs < 60 {
        "Just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    /// Global announce counter value when the node was first seen.
    pub first_announce_seq: u64,
    pub announce_count: u64,
    pub app_data_length: usize,
}

/// Registry entry as served to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub last_seen: String,
    pub last_seen_relative: String,
    pub first_announce_seq: u64,
    pub announce_count: u64,
    pub app_data_length: usize,
}

impl NodeRecord {
    pub fn view(&self, now: DateTime<Utc>) -> NodeView {
        NodeView {
            id: self.id,
            name: self.name.clone(),
            last_seen: self.last_seen.to_rfc3339(),
            last_seen_relative: relative_time(self.last_seen, now),
            first_announce_seq: self.first_announce_seq,
            announce_count: self.announce_count,
            app_data_length: self.app_data_length,
        }
    }
}

/// Result of registering one announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted(NodeRecord),
    Rejected(String),
}

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<NodeId, NodeRecord>,
    announce_count: u64,
    last_announce: Option<DateTime<Utc>>,
}

/// Known nodes keyed by destination, plus global announce counters.
#[derive(Default)]
pub struct NodeRegistry {
    inner: Mutex<RegistryState>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the announce and upsert the node unless its name is synthetic.
    pub fn register(&self, node: NodeId, app_data: Option<&[u8]>, now: DateTime<Utc>) -> Admission {
        let name = decode_node_name(app_data, &node);

        let mut inner = self.inner.lock();
        inner.announce_count += 1;
        inner.last_announce = Some(now);

        if is_synthetic_name(&name) {
            tracing::debug!("Ignoring announce from {} with name {}", node, name);
            return Admission::Rejected(name);
        }

        let seq = inner.announce_count;
        let record = inner.nodes.entry(node).or_insert_with(|| {
            tracing::info!("New node {} ({})", name, node);
            NodeRecord {
                id: node,
                name: name.clone(),
                last_seen: now,
                first_announce_seq: seq,
                announce_count: 0,
                app_data_length: 0,
            }
        });
        record.announce_count += 1;
        record.name = name;
        record.last_seen = now;
        record.app_data_length = app_data.map_or(0, <[u8]>::len);

        Admission::Accepted(record.clone())
    }

    /// Nodes in first-seen order.
    pub fn list(&self, now: DateTime<Utc>) -> Vec<NodeView> {
        let inner = self.inner.lock();
        let mut records: Vec<&NodeRecord> = inner.nodes.values().collect();
        records.sort_by_key(|r| r.first_announce_seq);
        records.into_iter().map(|r| r.view(now)).collect()
    }

    pub fn ids(&self) -> Vec<(NodeId, String)> {
        let inner = self.inner.lock();
        let mut records: Vec<&NodeRecord> = inner.nodes.values().collect();
        records.sort_by_key(|r| r.first_announce_seq);
        records.into_iter().map(|r| (r.id, r.name.clone())).collect()
    }

    pub fn get(&self, node: &NodeId) -> Option<NodeRecord> {
        self.inner.lock().nodes.get(node).cloned()
    }

    pub fn lookup_name(&self, node: &NodeId) -> Option<String> {
        self.inner.lock().nodes.get(node).map(|r| r.name.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> AnnounceStats {
        let inner = self.inner.lock();
        AnnounceStats {
            node_count: inner.nodes.len(),
            announce_count: inner.announce_count,
            last_announce: inner.last_announce,
        }
    }
}
