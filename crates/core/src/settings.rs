//! Persisted cache settings.
//!
//! Settings are read once from a JSON file (missing keys take their defaults)
//! and written back after every mutation. A limit of `-1` means unlimited.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Sentinel for "no limit" in size and expiry settings.
pub const UNLIMITED: i64 = -1;

/// Largest accepted size cap (1 TiB).
pub const MAX_SIZE_LIMIT_MB: i64 = 1024 * 1024;

/// Largest accepted expiry (100 years).
pub const MAX_EXPIRY_DAYS: i64 = 36_500;

/// Cache policy knobs exposed to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub auto_cache_enabled: bool,
    pub size_limit_mb: i64,
    pub expiry_days: i64,
    #[serde(rename = "search_limit")]
    pub search_result_limit: usize,
    #[serde(rename = "cache_additional")]
    pub cache_additional_pages: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            auto_cache_enabled: true,
            size_limit_mb: 100,
            expiry_days: 30,
            search_result_limit: 50,
            cache_additional_pages: false,
        }
    }
}

impl CacheSettings {
    /// Size cap in bytes, or `None` when unlimited.
    pub fn size_limit_bytes(&self) -> Option<u64> {
        if self.size_limit_mb == UNLIMITED {
            return None;
        }
        u64::try_from(self.size_limit_mb).ok().and_then(|mb| mb.checked_mul(1024 * 1024))
    }

    /// Expiry in whole days, or `None` when entries never expire.
    pub fn expiry(&self) -> Option<i64> {
        (self.expiry_days != UNLIMITED).then_some(self.expiry_days)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !size_limit_ok(self.size_limit_mb) {
            return Err(Error::InvalidInput(format!("size_limit_mb must be -1 or between 1 and {MAX_SIZE_LIMIT_MB}")));
        }
        if !expiry_ok(self.expiry_days) {
            return Err(Error::InvalidInput(format!("expiry_days must be -1 or between 1 and {MAX_EXPIRY_DAYS}")));
        }
        if self.search_result_limit == 0 {
            return Err(Error::InvalidInput("search_limit must be positive".into()));
        }
        Ok(())
    }

    /// Replace every out-of-range field with its default.
    pub fn sanitized(self) -> Self {
        let defaults = CacheSettings::default();
        let mut settings = self;
        if !size_limit_ok(settings.size_limit_mb) {
            tracing::warn!(size_limit_mb = settings.size_limit_mb, "Invalid size limit in settings file, using default");
            settings.size_limit_mb = defaults.size_limit_mb;
        }
        if !expiry_ok(settings.expiry_days) {
            tracing::warn!(expiry_days = settings.expiry_days, "Invalid expiry in settings file, using default");
            settings.expiry_days = defaults.expiry_days;
        }
        if settings.search_result_limit == 0 {
            tracing::warn!("Invalid search limit in settings file, using default");
            settings.search_result_limit = defaults.search_result_limit;
        }
        settings
    }
}

fn size_limit_ok(mb: i64) -> bool {
    mb == UNLIMITED || (1..=MAX_SIZE_LIMIT_MB).contains(&mb)
}

fn expiry_ok(days: i64) -> bool {
    days == UNLIMITED || (1..=MAX_EXPIRY_DAYS).contains(&days)
}

/// A single administrative settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsUpdate {
    AutoCache(bool),
    SizeLimitMb(i64),
    ExpiryDays(i64),
    SearchLimit(usize),
    CacheAdditional(bool),
}

/// Settings held in memory and mirrored to a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<CacheSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is absent.
    ///
    /// A file that exists but cannot be parsed is an error. Out-of-range values
    /// are replaced by their defaults.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<CacheSettings>(&text)?.sanitized(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No settings file at {}, using defaults", path.display());
                CacheSettings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, current: Mutex::new(current) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> CacheSettings {
        self.current.lock().clone()
    }

    /// Apply one update, validate the result and persist it.
    ///
    /// On validation failure nothing changes in memory or on disk.
    pub fn update(&self, update: SettingsUpdate) -> Result<CacheSettings, Error> {
        let mut current = self.current.lock();
        let mut next = current.clone();
        match update {
            SettingsUpdate::AutoCache(enabled) => next.auto_cache_enabled = enabled,
            SettingsUpdate::SizeLimitMb(mb) => next.size_limit_mb = mb,
            SettingsUpdate::ExpiryDays(days) => next.expiry_days = days,
            SettingsUpdate::SearchLimit(limit) => next.search_result_limit = limit,
            SettingsUpdate::CacheAdditional(enabled) => next.cache_additional_pages = enabled,
        }
        next.validate()?;

        persist(&self.path, &next)?;
        tracing::info!(?update, "Cache settings updated");
        *current = next.clone();
        Ok(next)
    }

    /// Write the current settings to disk.
    pub fn save(&self) -> Result<(), Error> {
        let current = self.current.lock();
        persist(&self.path, &current)
    }
}

fn persist(path: &Path, settings: &CacheSettings) -> Result<(), Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.get(), CacheSettings::default());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"size_limit_mb": -1, "search_limit": 5}"#).unwrap();

        let settings = SettingsStore::load(&path).unwrap().get();
        assert_eq!(settings.size_limit_mb, -1);
        assert_eq!(settings.search_result_limit, 5);
        assert!(settings.auto_cache_enabled);
        assert_eq!(settings.expiry_days, 30);
        assert!(!settings.cache_additional_pages);
        assert_eq!(settings.size_limit_bytes(), None);
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let store = SettingsStore::load(&path).unwrap();

        store.update(SettingsUpdate::CacheAdditional(true)).unwrap();
        store.update(SettingsUpdate::ExpiryDays(-1)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"cache_additional\": true"));
        let reloaded = SettingsStore::load(&path).unwrap().get();
        assert!(reloaded.cache_additional_pages);
        assert_eq!(reloaded.expiry(), None);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::load(&path).unwrap();

        assert!(matches!(store.update(SettingsUpdate::SizeLimitMb(0)), Err(Error::InvalidInput(_))));
        assert!(matches!(store.update(SettingsUpdate::ExpiryDays(-5)), Err(Error::InvalidInput(_))));
        assert!(matches!(store.update(SettingsUpdate::SearchLimit(0)), Err(Error::InvalidInput(_))));
        assert_eq!(store.get(), CacheSettings::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_size_limit_bytes() {
        let settings = CacheSettings { size_limit_mb: 2, ..Default::default() };
        assert_eq!(settings.size_limit_bytes(), Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_size_limit_bytes_never_overflows() {
        let settings = CacheSettings { size_limit_mb: i64::MAX / 2, ..Default::default() };
        assert!(settings.validate().is_err());
        assert_eq!(settings.size_limit_bytes(), None);

        let largest = CacheSettings { size_limit_mb: MAX_SIZE_LIMIT_MB, ..Default::default() };
        assert!(largest.validate().is_ok());
        assert_eq!(largest.size_limit_bytes(), Some(1024 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_huge_limits_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();

        assert!(matches!(store.update(SettingsUpdate::ExpiryDays(100_000_000)), Err(Error::InvalidInput(_))));
        assert!(matches!(store.update(SettingsUpdate::SizeLimitMb(i64::MAX / 2)), Err(Error::InvalidInput(_))));
        assert!(store.update(SettingsUpdate::ExpiryDays(MAX_EXPIRY_DAYS)).is_ok());
        assert_eq!(store.get().expiry(), Some(MAX_EXPIRY_DAYS));
    }

    #[test]
    fn test_out_of_range_file_values_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"expiry_days": -5, "size_limit_mb": 0, "search_limit": 0, "cache_additional": true}"#,
        )
        .unwrap();

        let settings = SettingsStore::load(&path).unwrap().get();
        assert_eq!(settings.expiry_days, 30);
        assert_eq!(settings.size_limit_mb, 100);
        assert_eq!(settings.search_result_limit, 50);
        assert!(settings.cache_additional_pages);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(SettingsStore::load(&path), Err(Error::Settings(_))));
    }
}
