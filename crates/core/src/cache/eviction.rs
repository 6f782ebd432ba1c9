//! Size- and age-based eviction of whole node directories.
//!
//! A node directory without a readable `cached_at.txt` counts as cached "now":
//! it is never expired and is the last candidate for size eviction. Directories
//! removed by a concurrent pass are skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};

use super::store::{CacheStore, read_cached_at};
use crate::settings::CacheSettings;
use crate::Error;

/// Directories removed by an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: Vec<String>,
    pub bytes_freed: u64,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    fn merge(&mut self, other: EvictionReport) {
        self.removed.extend(other.removed);
        self.bytes_freed += other.bytes_freed;
    }
}

struct Candidate {
    path: PathBuf,
    size: u64,
    cached_at: DateTime<Utc>,
}

impl CacheStore {
    /// Run the size pass then the expiry pass with the limits in `settings`.
    pub fn run_eviction(&self, settings: &CacheSettings, now: DateTime<Utc>) -> Result<EvictionReport, Error> {
        let mut report = self.enforce_size_limit(settings.size_limit_bytes(), now)?;
        report.merge(self.cleanup_expired(settings.expiry(), now)?);
        Ok(report)
    }

    /// Remove node directories oldest-first until the tree fits in `limit_bytes`.
    ///
    /// `None` means unlimited and is a no-op.
    pub fn enforce_size_limit(&self, limit_bytes: Option<u64>, now: DateTime<Utc>) -> Result<EvictionReport, Error> {
        let mut report = EvictionReport::default();
        let Some(limit) = limit_bytes else {
            return Ok(report);
        };

        let mut candidates = Vec::new();
        let mut total = 0u64;
        for path in self.node_dirs()? {
            let Some(size) = existing_size(&path)? else {
                continue;
            };
            let cached_at = read_cached_at(&path).unwrap_or(now);
            total += size;
            candidates.push(Candidate { path, size, cached_at });
        }

        if total <= limit {
            return Ok(report);
        }

        tracing::warn!(total_bytes = total, limit_bytes = limit, "Cache size exceeds limit, removing oldest entries");

        candidates.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.path.cmp(&b.path)));
        for candidate in candidates {
            if total <= limit {
                break;
            }
            match fs::remove_dir_all(&candidate.path) {
                Ok(()) => {
                    total = total.saturating_sub(candidate.size);
                    tracing::info!("Removed old cache {} ({} KB)", dir_label(&candidate.path), candidate.size / 1024);
                    report.removed.push(dir_label(&candidate.path));
                    report.bytes_freed += candidate.size;
                }
                Err(e) => {
                    tracing::warn!(path = %candidate.path.display(), error = %e, "Failed to remove cache directory");
                }
            }
        }

        Ok(report)
    }

    /// Remove node directories cached more than `expiry_days` before `now`.
    ///
    /// `None` means entries never expire.
    pub fn cleanup_expired(&self, expiry_days: Option<i64>, now: DateTime<Utc>) -> Result<EvictionReport, Error> {
        let mut report = EvictionReport::default();
        let Some(cutoff) = expiry_days.and_then(|days| expiry_cutoff(days, now)) else {
            return Ok(report);
        };

        for path in self.node_dirs()? {
            let Some(cached_at) = read_cached_at(&path) else {
                continue;
            };
            if cached_at >= cutoff {
                continue;
            }

            let Some(size) = existing_size(&path)? else {
                continue;
            };
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::info!("Expired cache removed: {}", dir_label(&path));
                    report.removed.push(dir_label(&path));
                    report.bytes_freed += size;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove expired cache directory");
                }
            }
        }

        if !report.is_empty() {
            tracing::info!("Removed {} expired cache entries", report.removed.len());
        }
        Ok(report)
    }
}

/// Oldest timestamp that is still kept, or `None` when nothing can expire.
fn expiry_cutoff(days: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if days < 0 {
        return None;
    }
    TimeDelta::try_days(days).and_then(|age| now.checked_sub_signed(age))
}

/// Size of `dir`, or `None` if it disappeared in the meantime.
fn existing_size(dir: &Path) -> Result<Option<u64>, Error> {
    match dir_size(dir) {
        Ok(size) => Ok(Some(size)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("Cache directory {} vanished during eviction", dir.display());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Total size of all regular files below `dir`.
pub(crate) fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

fn dir_label(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 16])
    }

    fn seed(store: &CacheStore, id: &NodeId, bytes: usize, at: DateTime<Utc>) {
        store.write(id, "/page/index.mu", "x".repeat(bytes), "Node").unwrap();
        store.touch(id, at).unwrap();
    }

    #[test]
    fn test_size_limit_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 1000, now - TimeDelta::days(3));
        seed(&store, &node(2), 1000, now - TimeDelta::days(1));
        seed(&store, &node(3), 1000, now - TimeDelta::days(2));

        let report = store.enforce_size_limit(Some(2500), now).unwrap();

        assert_eq!(report.removed, vec![node(1).to_hex()]);
        assert!(report.bytes_freed >= 1000);
        assert_eq!(store.list_nodes().unwrap(), vec![node(2), node(3)]);
    }

    #[test]
    fn test_size_limit_noop_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 500, now);
        seed(&store, &node(2), 500, now);

        let report = store.enforce_size_limit(Some(10_000), now).unwrap();
        assert!(report.is_empty());
        assert_eq!(store.list_nodes().unwrap().len(), 2);

        let report = store.enforce_size_limit(None, now).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_missing_timestamp_evicted_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 1000, now - TimeDelta::days(1));
        store.write(&node(2), "/page/index.mu", "y".repeat(1000), "Node").unwrap();
        fs::remove_file(store.node_dir(&node(2)).join("cached_at.txt")).unwrap();

        let report = store.enforce_size_limit(Some(1500), now + TimeDelta::seconds(1)).unwrap();
        assert_eq!(report.removed, vec![node(1).to_hex()]);
        assert_eq!(store.list_nodes().unwrap(), vec![node(2)]);
    }

    #[test]
    fn test_expiry_removes_only_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 10, now - TimeDelta::days(31));
        seed(&store, &node(2), 10, now - TimeDelta::days(29));
        store.write(&node(3), "/page/about.mu", "no timestamp here", "Node").unwrap();

        let report = store.cleanup_expired(Some(30), now).unwrap();

        assert_eq!(report.removed, vec![node(1).to_hex()]);
        assert_eq!(store.list_nodes().unwrap(), vec![node(2), node(3)]);
    }

    #[test]
    fn test_expiry_never() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 10, now - TimeDelta::days(3650));

        assert!(store.cleanup_expired(None, now).unwrap().is_empty());
        assert_eq!(store.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_expiry_beyond_calendar_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 10, now - TimeDelta::days(3650));

        assert!(store.cleanup_expired(Some(100_000_000), now).unwrap().is_empty());
        assert!(store.cleanup_expired(Some(i64::MAX), now).unwrap().is_empty());
        assert!(store.cleanup_expired(Some(-5), now).unwrap().is_empty());
        assert_eq!(store.list_nodes().unwrap(), vec![node(1)]);
    }

    #[test]
    fn test_run_eviction_with_extreme_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 10, now);

        let settings = CacheSettings { size_limit_mb: i64::MAX / 2, expiry_days: 100_000_000, ..Default::default() };
        assert!(store.run_eviction(&settings, now).unwrap().is_empty());
        assert_eq!(store.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_vanished_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        seed(&store, &node(1), 10, Utc::now());
        let path = store.node_dir(&node(1));
        fs::remove_dir_all(&path).unwrap();

        assert_eq!(existing_size(&path).unwrap(), None);
        assert!(existing_size(dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_run_eviction_uses_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        seed(&store, &node(1), 10, now - TimeDelta::days(8));
        seed(&store, &node(2), 10, now);

        let settings = CacheSettings { expiry_days: 7, ..Default::default() };
        let report = store.run_eviction(&settings, now).unwrap();
        assert_eq!(report.removed, vec![node(1).to_hex()]);
    }
}
