//! Connection state tracking and the health summary shown to users.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

const WAITING_FOR_ANNOUNCES_SECS: f64 = 45.0;
const WAITING_FOR_ACTIVITY_SECS: f64 = 120.0;
const STALE_ANNOUNCE_SECS: f64 = 300.0;

/// Lifecycle of the overlay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Initializing,
    Connecting,
    Connected,
    Active,
    Failed,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Online,
    Waiting,
    Connerror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub status: Health,
    pub message: String,
    pub color: StatusColor,
}

impl ConnectionSummary {
    fn new(status: Health, message: impl Into<String>) -> Self {
        let color = match status {
            Health::Online => StatusColor::Green,
            Health::Waiting => StatusColor::Yellow,
            Health::Connerror => StatusColor::Red,
        };
        ConnectionSummary { status, message: message.into(), color }
    }
}

/// Registry figures folded into a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnounceStats {
    pub node_count: usize,
    pub announce_count: u64,
    pub last_announce: Option<DateTime<Utc>>,
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: f64,
    pub has_nodes: bool,
    pub since_last_announce_secs: Option<f64>,
    pub node_count: usize,
    pub announce_count: u64,
    pub connection_state: ConnectionState,
    pub transport_ready: bool,
}

impl StatusSnapshot {
    /// Map the snapshot onto the online / waiting / connerror summary.
    pub fn summary(&self) -> ConnectionSummary {
        if !self.transport_ready {
            return ConnectionSummary::new(Health::Connerror, "Transport initialization failed");
        }

        match self.connection_state {
            ConnectionState::Failed => ConnectionSummary::new(Health::Connerror, "Connection failed during startup"),
            ConnectionState::Initializing => ConnectionSummary::new(Health::Waiting, "Initializing transport..."),
            ConnectionState::Connecting => ConnectionSummary::new(Health::Waiting, "Connecting to the network..."),
            ConnectionState::Connected => {
                let message = if self.uptime_secs < WAITING_FOR_ANNOUNCES_SECS {
                    "Waiting for announces..."
                } else if self.uptime_secs < WAITING_FOR_ACTIVITY_SECS {
                    "Waiting for network activity..."
                } else {
                    "Connected but no network activity"
                };
                ConnectionSummary::new(Health::Waiting, message)
            }
            ConnectionState::Active if self.has_nodes => match self.since_last_announce_secs {
                Some(since) if since > STALE_ANNOUNCE_SECS => {
                    ConnectionSummary::new(Health::Waiting, "No recent announces (connection may be stale)")
                }
                _ => ConnectionSummary::new(Health::Online, "Online. Connected!"),
            },
            ConnectionState::Active => ConnectionSummary::new(Health::Waiting, "Connection active but no nodes found"),
            ConnectionState::Shutdown => ConnectionSummary::new(Health::Connerror, "Gateway is shutting down"),
        }
    }
}

/// Snapshot plus its summary, as handed to the web layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub summary: ConnectionSummary,
}

struct TrackerState {
    state: ConnectionState,
    transport_ready: bool,
    cached: Option<(Instant, StatusSnapshot)>,
}

/// Owns the connection state and caches snapshots for a short window.
pub struct StatusTracker {
    started: DateTime<Utc>,
    cache_ttl: Duration,
    inner: Mutex<TrackerState>,
}

impl StatusTracker {
    pub fn new(cache_ttl: Duration) -> Self {
        Self::started_at(Utc::now(), cache_ttl)
    }

    pub fn started_at(started: DateTime<Utc>, cache_ttl: Duration) -> Self {
        StatusTracker {
            started,
            cache_ttl,
            inner: Mutex::new(TrackerState { state: ConnectionState::Initializing, transport_ready: false, cached: None }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut inner = self.inner.lock();
        if inner.state != state {
            tracing::info!("Connection state {:?} -> {:?}", inner.state, state);
            inner.state = state;
            inner.cached = None;
        }
    }

    pub fn set_transport_ready(&self, ready: bool) {
        let mut inner = self.inner.lock();
        inner.transport_ready = ready;
        inner.cached = None;
    }

    /// Move `Connected` to `Active`. Returns whether the state changed.
    pub fn activate(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return false;
        }
        inner.state = ConnectionState::Active;
        inner.cached = None;
        tracing::info!("Connection state Connected -> Active");
        true
    }

    /// Current snapshot, rebuilt from `stats` only once the cached one expired.
    pub fn snapshot(&self, now: DateTime<Utc>, stats: impl FnOnce() -> AnnounceStats) -> StatusSnapshot {
        let mut inner = self.inner.lock();
        if let Some((taken, snapshot)) = &inner.cached {
            if taken.elapsed() < self.cache_ttl {
                return snapshot.clone();
            }
        }

        let stats = stats();
        let snapshot = StatusSnapshot {
            uptime_secs: seconds_between(self.started, now),
            has_nodes: stats.node_count > 0,
            since_last_announce_secs: stats.last_announce.map(|at| seconds_between(at, now)),
            node_count: stats.node_count,
            announce_count: stats.announce_count,
            connection_state: inner.state,
            transport_ready: inner.transport_ready,
        };
        inner.cached = Some((Instant::now(), snapshot.clone()));
        snapshot
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn snapshot(state: ConnectionState) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: 10.0,
            has_nodes: false,
            since_last_announce_secs: None,
            node_count: 0,
            announce_count: 0,
            connection_state: state,
            transport_ready: true,
        }
    }

    #[test]
    fn test_not_ready_is_connerror() {
        let summary = StatusSnapshot { transport_ready: false, ..snapshot(ConnectionState::Active) }.summary();
        assert_eq!(summary.status, Health::Connerror);
        assert_eq!(summary.color, StatusColor::Red);
    }

    #[test]
    fn test_connected_messages_follow_uptime() {
        let early = snapshot(ConnectionState::Connected).summary();
        assert_eq!(early.status, Health::Waiting);
        assert_eq!(early.message, "Waiting for announces...");

        let later = StatusSnapshot { uptime_secs: 60.0, ..snapshot(ConnectionState::Connected) }.summary();
        assert_eq!(later.message, "Waiting for network activity...");

        let quiet = StatusSnapshot { uptime_secs: 600.0, ..snapshot(ConnectionState::Connected) }.summary();
        assert_eq!(quiet.message, "Connected but no network activity");
        assert_eq!(quiet.color, StatusColor::Yellow);
    }

    #[test]
    fn test_active_online_and_stale() {
        let base = StatusSnapshot {
            has_nodes: true,
            node_count: 3,
            since_last_announce_secs: Some(12.0),
            ..snapshot(ConnectionState::Active)
        };
        let online = base.summary();
        assert_eq!(online.status, Health::Online);
        assert_eq!(online.color, StatusColor::Green);

        let stale = StatusSnapshot { since_last_announce_secs: Some(301.0), ..base }.summary();
        assert_eq!(stale.status, Health::Waiting);
        assert!(stale.message.contains("stale"));
    }

    #[test]
    fn test_active_without_nodes_waits() {
        let summary = snapshot(ConnectionState::Active).summary();
        assert_eq!(summary.status, Health::Waiting);
        assert_eq!(summary.message, "Connection active but no nodes found");
    }

    #[test]
    fn test_failed_and_shutdown_are_errors() {
        assert_eq!(snapshot(ConnectionState::Failed).summary().status, Health::Connerror);
        assert_eq!(snapshot(ConnectionState::Shutdown).summary().status, Health::Connerror);
    }

    #[test]
    fn test_activate_only_from_connected() {
        let tracker = StatusTracker::new(Duration::ZERO);
        assert!(!tracker.activate());

        tracker.set_state(ConnectionState::Connected);
        assert!(tracker.activate());
        assert_eq!(tracker.state(), ConnectionState::Active);
        assert!(!tracker.activate());
    }

    #[test]
    fn test_snapshot_is_cached() {
        let now = Utc::now();
        let tracker = StatusTracker::started_at(now - TimeDelta::seconds(30), Duration::from_secs(60));
        tracker.set_transport_ready(true);

        let first = tracker.snapshot(now, || AnnounceStats { node_count: 1, announce_count: 1, last_announce: Some(now) });
        assert_eq!(first.node_count, 1);
        assert_eq!(first.uptime_secs, 30.0);
        assert_eq!(first.since_last_announce_secs, Some(0.0));

        let second = tracker.snapshot(now, || AnnounceStats { node_count: 5, ..Default::default() });
        assert_eq!(second.node_count, 1);

        // state changes drop the cached copy
        tracker.set_state(ConnectionState::Connected);
        let third = tracker.snapshot(now, || AnnounceStats { node_count: 5, ..Default::default() });
        assert_eq!(third.node_count, 5);
        assert_eq!(third.connection_state, ConnectionState::Connected);
    }

    #[test]
    fn test_status_serializes_flat() {
        let snapshot = snapshot(ConnectionState::Connected);
        let status = ConnectionStatus { summary: snapshot.summary(), snapshot };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connection_state"], "connected");
        assert_eq!(json["summary"]["status"], "waiting");
        assert_eq!(json["summary"]["color"], "yellow");
    }
}
