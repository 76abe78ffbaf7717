//! Disk-backed most-recently-used path cache.
//!
//! Every mutation rewrites the whole file. Load and write failures are never
//! returned to callers: a broken cache file degrades to an empty cache, and a
//! failed write leaves the in-memory state authoritative until the next
//! successful write.

use crate::model::PathCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of remembered paths per category.
pub const MAX_ENTRIES: usize = 10;

const APP_DIR: &str = "unreal-plugin-migrator";
const CACHE_FILE: &str = "path_cache.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize path cache: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Callback invoked with write failures that are otherwise swallowed.
pub type DiagnosticHook = Box<dyn Fn(&StorageError) + Send>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    uplugin_paths: Vec<String>,
    #[serde(default)]
    save_paths: Vec<String>,
    #[serde(default)]
    ue_paths: Vec<String>,
}

impl CacheFile {
    fn list(&self, category: PathCategory) -> &Vec<String> {
        match category {
            PathCategory::Plugin => &self.uplugin_paths,
            PathCategory::Destination => &self.save_paths,
            PathCategory::Engine => &self.ue_paths,
        }
    }

    fn list_mut(&mut self, category: PathCategory) -> &mut Vec<String> {
        match category {
            PathCategory::Plugin => &mut self.uplugin_paths,
            PathCategory::Destination => &mut self.save_paths,
            PathCategory::Engine => &mut self.ue_paths,
        }
    }
}

pub struct PathCache {
    path: PathBuf,
    data: CacheFile,
    diagnostics: Option<DiagnosticHook>,
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("path", &self.path)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl PartialEq for PathCache {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// Default cache location under the user's config directory.
pub fn default_cache_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CACHE_FILE)
}

/// Default log file location under the user's local data directory.
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("migrator.log")
}

/// Clean up a user-supplied path: trim whitespace and matching quotes, drop
/// trailing separators. Returns `None` when nothing is left.
pub fn normalize_path(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            s = s[1..s.len() - 1].trim();
        }
    }
    let trimmed = s.trim_end_matches(['/', '\\']);
    // Keep roots like "/" or "C:\" intact.
    let s = if trimmed.is_empty() || trimmed.ends_with(':') {
        s
    } else {
        trimmed
    };
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn read_cache_file(path: &Path) -> Result<CacheFile, StorageError> {
    let text = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Restore the list invariant on data that came from disk.
fn sanitize(list: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    list.retain(|p| !p.trim().is_empty() && seen.insert(p.clone()));
    list.truncate(MAX_ENTRIES);
}

impl PathCache {
    /// Load the cache at `path`, falling back to an empty cache on any error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match read_cache_file(&path) {
            Ok(mut data) => {
                for category in PathCategory::ALL {
                    sanitize(data.list_mut(category));
                }
                data
            }
            Err(StorageError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::debug!(path = %path.display(), "no path cache yet");
                CacheFile::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "path cache unreadable, starting empty");
                CacheFile::default()
            }
        };
        Self {
            path,
            data,
            diagnostics: None,
        }
    }

    /// Route swallowed write failures to `hook` in addition to the log.
    pub fn set_diagnostics(&mut self, hook: DiagnosticHook) {
        self.diagnostics = Some(hook);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self, category: PathCategory) -> &[String] {
        self.data.list(category)
    }

    pub fn front(&self, category: PathCategory) -> Option<&str> {
        self.data.list(category).first().map(String::as_str)
    }

    /// Move `path` to the front of `category`, inserting it if new.
    /// Returns whether the cache changed.
    pub fn add(&mut self, category: PathCategory, path: &str) -> bool {
        if path.is_empty() || self.front(category) == Some(path) {
            return false;
        }
        let list = self.data.list_mut(category);
        list.retain(|p| p != path);
        list.insert(0, path.to_string());
        list.truncate(MAX_ENTRIES);
        self.persist();
        true
    }

    /// Forget `path` in `category`. Returns whether it was present.
    pub fn remove(&mut self, category: PathCategory, path: &str) -> bool {
        let list = self.data.list_mut(category);
        let before = list.len();
        list.retain(|p| p != path);
        if list.len() == before {
            return false;
        }
        self.persist();
        true
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string_pretty(&self.data).map_err(StorageError::Serialize)
    }

    /// Write the whole cache to disk. Failures are logged and reported to the
    /// diagnostic hook, never returned.
    pub fn persist(&self) {
        if let Err(e) = self.try_persist() {
            tracing::warn!(error = %e, "failed to persist path cache");
            if let Some(hook) = &self.diagnostics {
                hook(&e);
            }
        }
    }

    fn try_persist(&self) -> Result<(), StorageError> {
        let json = self.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, json).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::trace!(path = %self.path.display(), "path cache persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn readd_moves_entry_to_front_without_duplicates() {
        let dir = tempdir().unwrap();
        let mut cache = PathCache::load(dir.path().join("cache.json"));
        cache.add(PathCategory::Plugin, "/a/Foo.uplugin");
        cache.add(PathCategory::Plugin, "/b/Bar.uplugin");
        cache.add(PathCategory::Plugin, "/a/Foo.uplugin");
        assert_eq!(
            cache.entries(PathCategory::Plugin),
            ["/a/Foo.uplugin", "/b/Bar.uplugin"]
        );
    }

    #[test]
    fn lists_stay_bounded_unique_and_recent_first() {
        let dir = tempdir().unwrap();
        let mut cache = PathCache::load(dir.path().join("cache.json"));
        let sequence = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3, 8, 4, 6, 2, 6, 4, 3, 11, 12];
        for n in sequence {
            let p = format!("/engines/UE_{n}");
            cache.add(PathCategory::Engine, &p);
            let list = cache.entries(PathCategory::Engine);
            assert!(list.len() <= MAX_ENTRIES);
            assert_eq!(list[0], p);
            let unique: std::collections::HashSet<_> = list.iter().collect();
            assert_eq!(unique.len(), list.len());
        }
        assert_eq!(cache.entries(PathCategory::Engine).len(), MAX_ENTRIES);
        assert_eq!(cache.entries(PathCategory::Engine)[1], "/engines/UE_11");
    }

    #[test]
    fn empty_path_and_front_entry_are_noops() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("cache.json");
        let mut cache = PathCache::load(&file);
        assert!(!cache.add(PathCategory::Destination, ""));
        assert!(!file.exists());
        assert!(cache.add(PathCategory::Destination, "/out"));
        assert!(!cache.add(PathCategory::Destination, "/out"));
    }

    #[test]
    fn add_then_remove_drops_the_path() {
        let dir = tempdir().unwrap();
        let mut cache = PathCache::load(dir.path().join("cache.json"));
        cache.add(PathCategory::Destination, "/keep");
        cache.add(PathCategory::Destination, "/drop");
        assert!(cache.remove(PathCategory::Destination, "/drop"));
        assert_eq!(cache.entries(PathCategory::Destination), ["/keep"]);
        assert!(!cache.remove(PathCategory::Destination, "/drop"));
    }

    #[test]
    fn corrupt_file_loads_empty_and_is_left_untouched() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("cache.json");
        std::fs::write(&file, "{ not json").unwrap();
        let cache = PathCache::load(&file);
        for category in PathCategory::ALL {
            assert!(cache.entries(category).is_empty());
        }
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "{ not json");
    }

    #[test]
    fn persist_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nested").join("cache.json");
        let mut cache = PathCache::load(&file);
        cache.add(PathCategory::Plugin, "/a/Foo.uplugin");
        cache.add(PathCategory::Destination, "/out");
        cache.add(PathCategory::Engine, "/opt/UE_5.3");
        cache.add(PathCategory::Engine, "/opt/UE_5.4");
        let reloaded = PathCache::load(&file);
        assert_eq!(reloaded, cache);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(raw["ue_paths"][0], "/opt/UE_5.4");
        assert_eq!(raw["save_paths"][0], "/out");
    }

    #[test]
    fn hand_edited_file_is_sanitized_on_load() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("cache.json");
        let many: Vec<String> = (0..15).map(|i| format!("/p{i}")).collect();
        let body = serde_json::json!({
            "uplugin_paths": ["/x", "", "/x", "/y"],
            "ue_paths": many,
        });
        std::fs::write(&file, body.to_string()).unwrap();
        let cache = PathCache::load(&file);
        assert_eq!(cache.entries(PathCategory::Plugin), ["/x", "/y"]);
        assert!(cache.entries(PathCategory::Destination).is_empty());
        assert_eq!(cache.entries(PathCategory::Engine).len(), MAX_ENTRIES);
    }

    #[test]
    fn write_failures_reach_the_diagnostic_hook() {
        let dir = tempdir().unwrap();
        // A directory in place of the file makes every write fail.
        let file = dir.path().join("cache.json");
        std::fs::create_dir(&file).unwrap();
        let mut cache = PathCache::load(&file);
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        cache.set_diagnostics(Box::new(move |e: &StorageError| {
            assert!(matches!(e, StorageError::Write { .. }));
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(cache.add(PathCategory::Plugin, "/a/Foo.uplugin"));
        assert!(cache.remove(PathCategory::Plugin, "/a/Foo.uplugin"));
        assert_eq!(failures.load(Ordering::SeqCst), 2);
        assert!(cache.entries(PathCategory::Plugin).is_empty());
    }

    #[test]
    fn normalize_strips_quotes_whitespace_and_trailing_separators() {
        assert_eq!(normalize_path("  \"/a/b/\"  ").as_deref(), Some("/a/b"));
        assert_eq!(normalize_path("'C:\\UE_5.3\\'").as_deref(), Some("C:\\UE_5.3"));
        assert_eq!(normalize_path("/").as_deref(), Some("/"));
        assert_eq!(normalize_path("C:\\").as_deref(), Some("C:\\"));
        assert_eq!(normalize_path("   "), None);
        assert_eq!(normalize_path("\"\""), None);
    }
}
