//! Page reads and writes against the on-disk cache tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::freshness::{self, Freshness};
use crate::{Error, NodeId};

pub const PRIMARY_FILE: &str = "index.mu";
pub const NAME_FILE: &str = "node_name.txt";
pub const CACHED_AT_FILE: &str = "cached_at.txt";
pub const PAGES_DIR: &str = "pages";
pub const DEFAULT_PRIMARY_PAGE: &str = "/page/index.mu";

/// Primary content shorter than this (after trimming) is treated as missing.
const MIN_PRIMARY_CHARS: usize = 10;

/// A node that was cached within this many seconds counts as just updated.
const UPDATED_WINDOW_SECS: i64 = 10;

const PAGE_PREFIX: &str = "/page/";
const PAGE_SUFFIX: &str = ".mu";

/// A page read back from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPage {
    pub node_id: NodeId,
    pub page_path: String,
    pub content: String,
    pub cached_at: Option<DateTime<Utc>>,
    pub node_name: Option<String>,
}

/// What the announce path should enqueue for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    FullRecache,
    AuxiliaryOnly,
    Skip,
}

/// Snapshot of what is on disk for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInspection {
    pub dir_exists: bool,
    pub primary_usable: bool,
    pub has_auxiliary: bool,
}

impl NodeInspection {
    pub fn decision(&self, cache_additional: bool) -> CacheDecision {
        if !self.dir_exists || !self.primary_usable {
            CacheDecision::FullRecache
        } else if cache_additional && !self.has_auxiliary {
            CacheDecision::AuxiliaryOnly
        } else {
            CacheDecision::Skip
        }
    }
}

/// Cache age summary for a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCacheStatus {
    pub cached: bool,
    pub cached_at: Option<String>,
    pub age_seconds: Option<i64>,
    pub cache_status: Freshness,
    pub updated: bool,
}

/// Filesystem cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    primary_page: String,
}

impl CacheStore {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::with_primary_page(root, DEFAULT_PRIMARY_PAGE)
    }

    /// Open a cache whose primary page lives at `primary_page` on every node.
    pub fn with_primary_page(root: impl Into<PathBuf>, primary_page: impl Into<String>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, primary_page: primary_page.into() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn primary_page(&self) -> &str {
        &self.primary_page
    }

    pub fn node_dir(&self, node: &NodeId) -> PathBuf {
        self.root.join(node.to_hex())
    }

    /// File that stores `page_path` for `node`.
    pub fn page_file(&self, node: &NodeId, page_path: &str) -> PathBuf {
        let dir = self.node_dir(node);
        if page_path == self.primary_page {
            dir.join(PRIMARY_FILE)
        } else {
            dir.join(PAGES_DIR).join(auxiliary_file_name(page_path))
        }
    }

    /// Persist `content` for `(node, page_path)`, overwriting any previous copy.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD. Primary writes also refresh the
    /// node name and the cache timestamp; auxiliary writes only record the
    /// name when none is stored yet.
    pub fn write(&self, node: &NodeId, page_path: &str, content: impl AsRef<[u8]>, node_name: &str) -> Result<(), Error> {
        let text = String::from_utf8_lossy(content.as_ref());
        let file = self.page_file(node, page_path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, text.as_bytes())?;

        let dir = self.node_dir(node);
        let is_primary = page_path == self.primary_page;
        if is_primary || !dir.join(NAME_FILE).exists() {
            fs::write(dir.join(NAME_FILE), node_name.as_bytes())?;
        }
        if is_primary {
            self.touch(node, Utc::now())?;
        }

        tracing::debug!("Cached {} chars of {} for {} ({})", text.chars().count(), page_path, node_name, node.short_hex());
        Ok(())
    }

    /// Overwrite the cache timestamp of `node`.
    pub fn touch(&self, node: &NodeId, at: DateTime<Utc>) -> Result<(), Error> {
        let dir = self.node_dir(node);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(CACHED_AT_FILE), at.to_rfc3339())?;
        Ok(())
    }

    /// Read a cached page.
    ///
    /// Returns None if the page was never cached.
    pub fn read(&self, node: &NodeId, page_path: &str) -> Result<Option<CachedPage>, Error> {
        let content = match fs::read(self.page_file(node, page_path)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(CachedPage {
            node_id: *node,
            page_path: page_path.to_string(),
            content,
            cached_at: self.cached_at(node),
            node_name: self.node_name(node),
        }))
    }

    /// Cached node ids, sorted. Directories whose names are not node ids are skipped.
    pub fn list_nodes(&self) -> Result<Vec<NodeId>, Error> {
        Ok(self
            .node_dirs()?
            .iter()
            .filter_map(|dir| dir.file_name()?.to_str().and_then(|name| NodeId::parse(name).ok()))
            .collect())
    }

    /// Every directory directly under the root, sorted by name.
    pub fn node_dirs(&self) -> Result<Vec<PathBuf>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Remove the whole cache tree and recreate an empty root.
    pub fn clear_all(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root)?;
        tracing::info!("Cleared cache at {}", self.root.display());
        Ok(())
    }

    /// Stored display name of `node`, if any.
    pub fn node_name(&self, node: &NodeId) -> Option<String> {
        read_name(&self.node_dir(node))
    }

    /// Time of the last primary write for `node`, if readable.
    pub fn cached_at(&self, node: &NodeId) -> Option<DateTime<Utc>> {
        read_cached_at(&self.node_dir(node))
    }

    /// Page paths of every auxiliary page cached for `node`, sorted by file name.
    pub fn auxiliary_pages(&self, node: &NodeId) -> Result<Vec<String>, Error> {
        Ok(auxiliary_files(&self.node_dir(node))?
            .iter()
            .filter_map(|file| file.file_name()?.to_str().map(page_path_for_file))
            .collect())
    }

    /// Inputs for the announce-time cache decision.
    pub fn inspect(&self, node: &NodeId) -> Result<NodeInspection, Error> {
        let dir = self.node_dir(node);
        if !dir.is_dir() {
            return Ok(NodeInspection { dir_exists: false, primary_usable: false, has_auxiliary: false });
        }

        let primary_usable = match fs::read(dir.join(PRIMARY_FILE)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().chars().count() >= MIN_PRIMARY_CHARS,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        let has_auxiliary = !auxiliary_files(&dir)?.is_empty();

        Ok(NodeInspection { dir_exists: true, primary_usable, has_auxiliary })
    }

    /// Cache age summary of `node` relative to `now`.
    pub fn node_status(&self, node: &NodeId, now: DateTime<Utc>) -> NodeCacheStatus {
        match self.cached_at(node) {
            Some(at) => {
                let age = now - at;
                NodeCacheStatus {
                    cached: true,
                    cached_at: Some(freshness::format_timestamp(at)),
                    age_seconds: Some(age.num_seconds()),
                    cache_status: Freshness::from_age(age),
                    updated: age.num_seconds() < UPDATED_WINDOW_SECS,
                }
            }
            None => NodeCacheStatus {
                cached: false,
                cached_at: None,
                age_seconds: None,
                cache_status: Freshness::Unknown,
                updated: false,
            },
        }
    }
}

pub(crate) fn read_name(dir: &Path) -> Option<String> {
    let bytes = fs::read(dir.join(NAME_FILE)).ok()?;
    let name = String::from_utf8_lossy(&bytes).trim().to_string();
    (!name.is_empty()).then_some(name)
}

pub(crate) fn read_cached_at(dir: &Path) -> Option<DateTime<Utc>> {
    let text = fs::read_to_string(dir.join(CACHED_AT_FILE)).ok()?;
    freshness::parse_timestamp(&text)
}

/// `*.mu` files in the node's pages directory, sorted.
pub(crate) fn auxiliary_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = match fs::read_dir(dir.join(PAGES_DIR)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.extension().is_some_and(|ext| ext == "mu") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name for an auxiliary page.
///
/// `/page/<stem>.mu` maps to `<stem>.mu` with `%` and `/` percent-escaped.
/// Any other path is escaped whole, leading slash included.
pub fn auxiliary_file_name(page_path: &str) -> String {
    let stem = page_path
        .strip_prefix(PAGE_PREFIX)
        .and_then(|rest| rest.strip_suffix(PAGE_SUFFIX))
        .unwrap_or(page_path);
    format!("{}{PAGE_SUFFIX}", escape(stem))
}

/// Inverse of [`auxiliary_file_name`].
pub fn page_path_for_file(file_name: &str) -> String {
    let stem = unescape(file_name.strip_suffix(PAGE_SUFFIX).unwrap_or(file_name));
    if stem.starts_with('/') { stem } else { format!("{PAGE_PREFIX}{stem}{PAGE_SUFFIX}") }
}

fn escape(stem: &str) -> String {
    stem.replace('%', "%25").replace('/', "%2F")
}

fn unescape(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut rest = stem;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%2F") {
            out.push('/');
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
