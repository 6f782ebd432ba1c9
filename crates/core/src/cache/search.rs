//! Full-text search over cached pages.
//!
//! Matching is a case-insensitive substring test against page content and
//! the node's display name. Node directories are visited in name order; within
//! a node the primary page comes first, then auxiliary pages by file name.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::freshness::{self, Freshness};
use super::store::{self, CacheStore, PRIMARY_FILE};
use crate::Error;

/// Characters of context kept around a match (split evenly on both sides).
const SNIPPET_CONTEXT: usize = 150;

const UNKNOWN_NODE_NAME: &str = "Unknown Node";

/// One cached page matching a search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub node_id: String,
    pub node_name: String,
    pub snippet: String,
    pub url: String,
    pub page_name: String,
    pub page_path: String,
    pub cached_at: Option<String>,
    pub cache_status: Freshness,
    pub cache_age_days: Option<f64>,
}

struct NodeMeta {
    id: String,
    name: String,
    cached_at: Option<String>,
    cache_status: Freshness,
    cache_age_days: Option<f64>,
}

impl CacheStore {
    /// Search cached pages for `query`, returning at most `limit` hits.
    ///
    /// A blank query yields no hits.
    pub fn search(&self, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<SearchHit>, Error> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let matcher = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("search query: {e}")))?;

        let mut hits = Vec::new();
        'nodes: for dir in self.node_dirs()? {
            let meta = node_meta(&dir, now);

            let mut files = Vec::new();
            let primary = dir.join(PRIMARY_FILE);
            if primary.is_file() {
                files.push((primary, self.primary_page().to_string()));
            }
            for file in store::auxiliary_files(&dir)? {
                let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let page_path = store::page_path_for_file(name);
                files.push((file, page_path));
            }

            for (file, page_path) in files {
                if hits.len() >= limit {
                    break 'nodes;
                }
                if let Some(hit) = match_file(&file, &page_path, &meta, &matcher) {
                    hits.push(hit);
                }
            }
        }

        tracing::debug!("Search for {:?} returned {} hits", query, hits.len());
        Ok(hits)
    }
}

fn node_meta(dir: &Path, now: DateTime<Utc>) -> NodeMeta {
    let id = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let name = store::read_name(dir).unwrap_or_else(|| UNKNOWN_NODE_NAME.to_string());
    let cached_at = store::read_cached_at(dir);

    NodeMeta {
        id,
        name,
        cached_at: cached_at.map(freshness::format_timestamp),
        cache_status: Freshness::of(cached_at, now),
        cache_age_days: cached_at.map(|at| freshness::age_days(now - at)),
    }
}

fn match_file(file: &Path, page_path: &str, meta: &NodeMeta, matcher: &Regex) -> Option<SearchHit> {
    let content = match fs::read(file) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(path = %file.display(), error = %e, "Failed to read cached page");
            return None;
        }
    };

    let name_match = matcher.is_match(&meta.name);
    if !name_match && !matcher.is_match(&content) {
        return None;
    }

    let mut snippet = extract_snippet(&content, matcher);
    if name_match {
        snippet = format!("Node name match: {}\n\n{snippet}", meta.name);
    }

    let page_name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Some(SearchHit {
        node_id: meta.id.clone(),
        node_name: meta.name.clone(),
        snippet,
        url: format!("{}:{page_path}", meta.id),
        page_name,
        page_path: page_path.to_string(),
        cached_at: meta.cached_at.clone(),
        cache_status: meta.cache_status,
        cache_age_days: meta.cache_age_days,
    })
}

/// Text around the first match of `matcher` with every match in the window
/// wrapped in `<mark>` tags. Without a match, the leading context is returned.
pub fn extract_snippet(content: &str, matcher: &Regex) -> String {
    let char_count = content.chars().count();
    let Some(found) = matcher.find(content) else {
        let head: String = content.chars().take(SNIPPET_CONTEXT).collect();
        return if char_count > SNIPPET_CONTEXT { format!("{head}...") } else { head };
    };

    let match_start = content[..found.start()].chars().count();
    let match_len = found.as_str().chars().count();
    let start = match_start.saturating_sub(SNIPPET_CONTEXT / 2);
    let end = (match_start + match_len + SNIPPET_CONTEXT / 2).min(char_count);

    let window: String = content.chars().skip(start).take(end - start).collect();
    let highlighted = matcher.replace_all(&window, "<mark>$0</mark>");

    let mut snippet = String::with_capacity(highlighted.len() + 6);
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(&highlighted);
    if end < char_count {
        snippet.push_str("...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;
    use chrono::TimeDelta;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 16])
    }

    fn matcher(query: &str) -> Regex {
        RegexBuilder::new(&regex::escape(query)).case_insensitive(true).build().unwrap()
    }

    #[test]
    fn test_snippet_highlights_keep_case() {
        let snippet = extract_snippet("Welcome to the Radio shack", &matcher("radio"));
        assert_eq!(snippet, "Welcome to the <mark>Radio</mark> shack");
    }

    #[test]
    fn test_snippet_window_is_truncated() {
        let content = format!("{}needle{}", "a".repeat(200), "b".repeat(200));
        let snippet = extract_snippet(&content, &matcher("needle"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("<mark>needle</mark>"));
        assert_eq!(snippet.len(), 3 + 75 + "<mark>needle</mark>".len() + 75 + 3);
    }

    #[test]
    fn test_snippet_without_match_uses_head() {
        let content = "z".repeat(200);
        let snippet = extract_snippet(&content, &matcher("q"));
        assert_eq!(snippet, format!("{}...", "z".repeat(150)));
        assert_eq!(extract_snippet("short", &matcher("q")), "short");
    }

    #[test]
    fn test_blank_query_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.write(&node(1), "/page/index.mu", "anything at all", "Node").unwrap();

        assert!(store.search("", 10, Utc::now()).unwrap().is_empty());
        assert!(store.search("   ", 10, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_auxiliary_page_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let id = node(1);
        store.write(&id, "/page/index.mu", "Nothing interesting", "Plain").unwrap();
        store.write(&id, "/page/about.mu", "We sell Radio gear", "Plain").unwrap();

        let hits = store.search("radio", 10, Utc::now()).unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.page_path, "/page/about.mu");
        assert_eq!(hit.page_name, "about.mu");
        assert_eq!(hit.url, format!("{}:/page/about.mu", id.to_hex()));
        assert!(hit.snippet.contains("<mark>Radio</mark>"));
        assert_eq!(hit.cache_status, Freshness::Fresh);
    }

    #[test]
    fn test_name_match_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.write(&node(1), "/page/index.mu", "plain body text", "Radio Club").unwrap();

        let hits = store.search("RADIO", 10, Utc::now()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "Node name match: Radio Club\n\nplain body text");
    }

    #[test]
    fn test_limit_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        for byte in [3u8, 1, 2] {
            store.write(&node(byte), "/page/index.mu", "shared keyword here", "Node").unwrap();
            store.write(&node(byte), "/page/about.mu", "keyword again", "Node").unwrap();
        }

        let hits = store.search("keyword", 3, Utc::now()).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].node_id, node(1).to_hex());
        assert_eq!(hits[0].page_path, "/page/index.mu");
        assert_eq!(hits[1].page_path, "/page/about.mu");
        assert_eq!(hits[2].node_id, node(2).to_hex());
    }

    #[test]
    fn test_hit_freshness_from_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let now = Utc::now();
        store.write(&node(1), "/page/index.mu", "old content", "Node").unwrap();
        store.touch(&node(1), now - TimeDelta::days(25)).unwrap();

        let hits = store.search("content", 5, now).unwrap();
        assert_eq!(hits[0].cache_status, Freshness::Old);
        assert!(hits[0].cache_age_days.unwrap() > 24.9);
    }
}
