//! Cache statistics and archive export.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use super::store::CacheStore;
use crate::Error;

/// Marker left in pages that were cached from an error response.
///
/// Current workers never persist failed fetches, so only cache trees written
/// by older releases contain it.
const FAILED_PAGE_MARKER: &str = "Request failed";

/// Aggregate numbers about the cache tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub node_count: usize,
    pub page_count: usize,
    pub valid_page_count: usize,
    pub total_bytes: u64,
    pub cache_size: String,
}

impl CacheStore {
    /// Count cached nodes and `.mu` pages.
    pub fn stats(&self) -> Result<CacheStats, Error> {
        let dirs = self.node_dirs()?;
        let mut stats = CacheStats {
            node_count: dirs.len(),
            page_count: 0,
            valid_page_count: 0,
            total_bytes: 0,
            cache_size: String::new(),
        };

        for dir in &dirs {
            collect_page_stats(dir, &mut stats)?;
        }
        stats.cache_size = format_size(stats.total_bytes);
        Ok(stats)
    }

    /// Every file under the cache root as a deflated zip, paths relative to the root.
    pub fn export_archive(&self) -> Result<Vec<u8>, Error> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        let mut files = 0usize;
        for dir in self.node_dirs()? {
            add_dir(&mut zip, self.root(), &dir, options, &mut files)?;
        }

        let cursor = zip.finish()?;
        tracing::info!("Exported {} cache files", files);
        Ok(cursor.into_inner())
    }
}

fn collect_page_stats(dir: &Path, stats: &mut CacheStats) -> Result<(), Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_page_stats(&path, stats)?;
            continue;
        }
        if !file_type.is_file() || path.extension().is_none_or(|ext| ext != "mu") {
            continue;
        }

        stats.page_count += 1;
        stats.total_bytes += entry.metadata()?.len();
        match fs::read(&path) {
            Ok(bytes) => {
                if !String::from_utf8_lossy(&bytes).contains(FAILED_PAGE_MARKER) {
                    stats.valid_page_count += 1;
                }
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read cached page"),
        }
    }
    Ok(())
}

fn add_dir(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>, root: &Path, dir: &Path, options: FileOptions<()>, files: &mut usize,
) -> Result<(), Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            add_dir(zip, root, &path, options, files)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path.as_path());
        let name = rel.to_string_lossy().replace('\\', "/");
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(&path)?)?;
        *files += 1;
    }
    Ok(())
}

/// Human readable size with one decimal: `B`, `KB` or `MB`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
