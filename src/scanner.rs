//! Working-tree scanning for snapshot capture
//!
//! Walks a working directory with gitignore-aware filtering and produces the
//! sorted [`FileEntry`] list a snapshot manifest is built from. The snapshot
//! store's own directory and the user's `.git` directory are always excluded
//! so captures never observe (or later clobber) repository internals.
//!
//! Scanning uses the `ignore` crate's parallel walker to collect paths and
//! rayon to hash file contents; both respect `.gitignore` files at every
//! level plus any custom patterns supplied through
//! [`EngineConfig`](crate::types::EngineConfig).

use crate::error::Result;
use crate::types::FileEntry;
use crate::utils;
use ignore::overrides::OverrideBuilder;
use ignore::{WalkBuilder, WalkState};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Scans a working tree into manifest entries
#[derive(Debug, Clone)]
pub struct WorktreeScanner {
    root: PathBuf,
    ignore_patterns: Vec<String>,
    max_file_size: u64,
    workers: usize,
    store_dir_name: String,
}

impl WorktreeScanner {
    /// Create a scanner rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ignore_patterns: Vec::new(),
            max_file_size: 0,
            workers: num_cpus::get(),
            store_dir_name: ".rewind".to_string(),
        }
    }

    /// Add custom ignore patterns (gitignore style)
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Skip files larger than `size` bytes (0 = unlimited)
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set walker thread count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Name of the in-worktree store directory to exclude from scans
    pub fn with_store_dir_name(mut self, name: impl Into<String>) -> Self {
        self.store_dir_name = name.into();
        self
    }

    /// Root this scanner walks
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the working tree into entries sorted by path
    ///
    /// Directories appear only when empty (they need an explicit manifest
    /// entry to survive restore); every regular file and symlink becomes one
    /// entry with its content hash computed.
    pub fn scan(&self) -> Result<Vec<FileEntry>> {
        let paths = Arc::new(Mutex::new(Vec::<(PathBuf, bool)>::new()));
        let dirs_with_children = Arc::new(Mutex::new(HashSet::<PathBuf>::new()));

        let mut walker = WalkBuilder::new(&self.root);
        walker
            .follow_links(false)
            .hidden(false)
            .parents(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.workers);

        let mut overrides = OverrideBuilder::new(&self.root);
        // Never observe the store's own objects or git internals
        overrides.add(&format!("!{}/", self.store_dir_name)).ok();
        overrides.add("!.git/").ok();
        for pattern in &self.ignore_patterns {
            let final_pattern = match pattern.strip_prefix('!') {
                Some(inner) => inner.to_string(),
                None => format!("!{}", pattern),
            };
            if let Err(e) = overrides.add(&final_pattern) {
                warn!("invalid ignore pattern '{}': {}", pattern, e);
            }
        }
        if let Ok(built) = overrides.build() {
            walker.overrides(built);
        }

        let root = self.root.clone();
        walker.build_parallel().run(|| {
            let paths = Arc::clone(&paths);
            let dirs_with_children = Arc::clone(&dirs_with_children);
            let root = root.clone();

            Box::new(move |entry_result| {
                let entry = match entry_result {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("walk error: {}", e);
                        return WalkState::Continue;
                    }
                };
                let path = entry.path();
                if path == root {
                    return WalkState::Continue;
                }

                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if !is_dir {
                    let mut parent = path.parent();
                    while let Some(p) = parent {
                        if p == root {
                            break;
                        }
                        dirs_with_children.lock().insert(p.to_path_buf());
                        parent = p.parent();
                    }
                }
                paths.lock().push((path.to_path_buf(), is_dir));
                WalkState::Continue
            })
        });

        let collected = std::mem::take(&mut *paths.lock());
        let entries: Vec<Option<FileEntry>> = collected
            .par_iter()
            .map(|(path, is_dir)| {
                process_entry(path, &self.root, self.max_file_size, *is_dir).unwrap_or_else(|e| {
                    warn!("error processing {:?}: {}", path, e);
                    None
                })
            })
            .collect();

        let dirs_with_children = dirs_with_children.lock();
        let mut result: Vec<FileEntry> = entries
            .into_iter()
            .flatten()
            .filter(|entry| {
                // A directory entry is only kept when nothing inside it survived
                // the ignore rules; non-empty directories are implied by their files
                !entry.is_directory || !dirs_with_children.contains(&self.root.join(&entry.path))
            })
            .collect();
        result.sort_by(|a, b| a.path.cmp(&b.path));

        debug!("scanned {} entries under {:?}", result.len(), self.root);
        Ok(result)
    }
}

/// Build one manifest entry from a filesystem path
pub(crate) fn process_entry(
    path: &Path,
    root: &Path,
    max_file_size: u64,
    is_directory: bool,
) -> Result<Option<FileEntry>> {
    let relative = utils::make_relative(path, root)?;
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        // Raced deletion between walk and processing
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        return Ok(Some(FileEntry {
            path: relative,
            content_hash: utils::hash_data(target.to_string_lossy().as_bytes()),
            size: 0,
            permissions: utils::get_permissions(&metadata),
            is_symlink: true,
            symlink_target: Some(target),
            is_directory: false,
        }));
    }

    if is_directory {
        return Ok(Some(FileEntry {
            path: relative,
            content_hash: String::new(),
            size: 0,
            permissions: utils::get_permissions(&metadata),
            is_symlink: false,
            symlink_target: None,
            is_directory: true,
        }));
    }

    let size = metadata.len();
    if max_file_size > 0 && size > max_file_size {
        debug!("skipping {:?}: {} bytes exceeds limit", relative, size);
        return Ok(None);
    }

    Ok(Some(FileEntry {
        path: relative,
        content_hash: utils::hash_file_content(path)?,
        size,
        permissions: utils::get_permissions(&metadata),
        is_symlink: false,
        symlink_target: None,
        is_directory: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(entries: &[FileEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_scan_basic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), "beta").unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf());
        let entries = scanner.scan().unwrap();
        assert_eq!(paths(&entries), vec!["a.txt", "sub/b.txt"]);
        assert!(entries.iter().all(|e| !e.content_hash.is_empty()));
    }

    #[test]
    fn test_scan_keeps_empty_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::create_dir(dir.path().join("full")).unwrap();
        fs::write(dir.path().join("full").join("f"), "x").unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf());
        let entries = scanner.scan().unwrap();
        let dirs: Vec<_> = entries.iter().filter(|e| e.is_directory).collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path, PathBuf::from("empty"));
    }

    #[test]
    fn test_scan_excludes_store_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tracked.txt"), "x").unwrap();
        fs::create_dir(dir.path().join(".rewind")).unwrap();
        fs::write(dir.path().join(".rewind").join("metadata.json"), "{}").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf());
        let entries = scanner.scan().unwrap();
        assert_eq!(paths(&entries), vec!["tracked.txt"]);
    }

    #[test]
    fn test_scan_custom_ignore_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.rs"), "x").unwrap();
        fs::write(dir.path().join("drop.log"), "x").unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf())
            .with_ignore_patterns(vec!["*.log".to_string()]);
        let entries = scanner.scan().unwrap();
        assert_eq!(paths(&entries), vec!["keep.rs"]);
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("bin"), "x").unwrap();
        fs::write(dir.path().join("src.rs"), "x").unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf());
        let entries = scanner.scan().unwrap();
        let names = paths(&entries);
        assert!(names.contains(&"src.rs".to_string()));
        assert!(!names.iter().any(|p| p.starts_with("target")));
    }

    #[test]
    fn test_max_file_size_limit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("small"), "ok").unwrap();
        fs::write(dir.path().join("large"), vec![0u8; 4096]).unwrap();

        let scanner = WorktreeScanner::new(dir.path().to_path_buf()).with_max_file_size(1024);
        let entries = scanner.scan().unwrap();
        assert_eq!(paths(&entries), vec!["small"]);
    }
}
