//! Content-addressable snapshot store
//!
//! The store backs every checkpoint with an immutable, content-addressable
//! snapshot of the working tree. It is a deliberate reimplementation of the
//! capture/compare/restore/gc primitives a mature VCS backend provides,
//! scoped to what the rewind engine needs:
//!
//! - **Objects**: file contents stored once by SHA-256 hash, sharded into
//!   two-character prefix directories, transparently LZ4-compressed
//! - **Manifests**: one binary (bincode) file listing per snapshot, keyed by
//!   the snapshot's tree id
//! - **Refs**: a flat namespace of named pointers (`refs/<name>` JSON files)
//!   holding a tree id; checkpoint and backup names live here
//! - **Sweep**: objects and manifests reachable from no ref can be deleted
//!
//! The tree id is the SHA-256 of the sorted manifest line items (path, entry
//! kind, content hash or link target), so identical working-tree content
//! always produces the same id regardless of when it was captured. Captures
//! never touch the working tree itself and nothing here mutates a git index
//! or branch pointer, so concurrent user git operations are unaffected.
//!
//! ## Layout
//!
//! ```text
//! store_root/
//! ├── metadata.json
//! ├── objects/<prefix>/<suffix>
//! ├── snapshots/<tree_id>.bin
//! └── refs/<ref-name>
//! ```

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::error::{Result, RewindError};
use crate::scanner::WorktreeScanner;
use crate::types::{
    FileEntry, RefData, RestoreStats, Snapshot, SnapshotManifest, StoreMetadata, TreeId,
};
use crate::utils;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Cached size information for a stored object
#[derive(Debug, Clone, Copy)]
struct ObjectInfo {
    compressed_size: u64,
}

/// Storage statistics
#[derive(Debug, Default, Clone)]
pub struct StoreStats {
    /// Unique objects currently known
    pub object_count: usize,
    /// Total compressed size of known objects
    pub total_size: u64,
    /// Snapshot manifests on disk
    pub snapshot_count: usize,
    /// Refs on disk
    pub ref_count: usize,
}

/// Content-addressable storage for working-tree snapshots
pub struct SnapshotStore {
    root: PathBuf,
    compression: Arc<Mutex<CompressionEngine>>,
    object_cache: Arc<DashMap<String, ObjectInfo>>,
    metadata: Arc<RwLock<StoreMetadata>>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("root", &self.root)
            .field("object_cache_size", &self.object_cache.len())
            .finish()
    }
}

impl SnapshotStore {
    /// Initialize a new store at `root`; fails if one already exists there
    pub fn init(root: PathBuf, strategy: CompressionStrategy) -> Result<Self> {
        if root.join("metadata.json").exists() {
            return Err(RewindError::storage(format!(
                "store already exists at {:?}",
                root
            )));
        }

        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("snapshots"))?;
        fs::create_dir_all(root.join("refs"))?;

        let metadata = StoreMetadata {
            format_version: 1,
            rewind_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)?;
        utils::atomic_write(&root.join("metadata.json"), metadata_json.as_bytes())?;

        info!("initialized snapshot store at {:?}", root);
        Ok(Self {
            root,
            compression: Arc::new(Mutex::new(CompressionEngine::new(strategy))),
            object_cache: Arc::new(DashMap::with_capacity(1000)),
            metadata: Arc::new(RwLock::new(metadata)),
        })
    }

    /// Open an existing store at `root`
    pub fn open(root: PathBuf, strategy: CompressionStrategy) -> Result<Self> {
        let metadata_path = root.join("metadata.json");
        if !metadata_path.exists() {
            return Err(RewindError::StoreNotInitialized(root));
        }
        let metadata_json = fs::read_to_string(&metadata_path)?;
        let mut metadata: StoreMetadata = serde_json::from_str(&metadata_json)?;
        metadata.last_accessed = Utc::now();

        debug!("opened snapshot store at {:?}", root);
        Ok(Self {
            root,
            compression: Arc::new(Mutex::new(CompressionEngine::new(strategy))),
            object_cache: Arc::new(DashMap::with_capacity(1000)),
            metadata: Arc::new(RwLock::new(metadata)),
        })
    }

    /// Open the store at `root`, initializing it on first use
    pub fn open_or_init(root: PathBuf, strategy: CompressionStrategy) -> Result<Self> {
        if root.join("metadata.json").exists() {
            Self::open(root, strategy)
        } else {
            Self::init(root, strategy)
        }
    }

    /// Store root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store metadata
    pub fn metadata(&self) -> StoreMetadata {
        self.metadata.read().clone()
    }

    // ---- objects ----------------------------------------------------------

    /// Store content, returning its hash and compressed size. Identical
    /// content is deduplicated.
    pub fn store_object(&self, content: &[u8], path: &Path) -> Result<(String, u64)> {
        let hash = utils::hash_data(content);

        if self.object_exists(&hash) {
            let size = self
                .object_cache
                .get(&hash)
                .map(|o| o.compressed_size)
                .unwrap_or(content.len() as u64);
            return Ok((hash, size));
        }

        let framed = self.compression.lock().compress(path, content)?;
        let compressed_size = framed.len() as u64;

        let object_path = self.object_path(&hash);
        if let Some(dir) = object_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&object_path, &framed)?;
        self.object_cache.insert(hash.clone(), ObjectInfo { compressed_size });

        trace!("stored object {} ({} bytes)", &hash[..8], compressed_size);
        Ok((hash, compressed_size))
    }

    /// Load and decompress content by hash
    pub fn load_object(&self, hash: &str) -> Result<Vec<u8>> {
        let object_path = self.object_path(hash);
        if !object_path.exists() {
            return Err(RewindError::ObjectNotFound(hash.to_string()));
        }
        let framed = fs::read(&object_path)?;
        self.compression.lock().decompress(&framed)
    }

    /// Check whether an object exists
    pub fn object_exists(&self, hash: &str) -> bool {
        self.object_cache.contains_key(hash) || self.object_path(hash).exists()
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let (prefix, suffix) = hash.split_at(2.min(hash.len()));
        self.root.join("objects").join(prefix).join(suffix)
    }

    // ---- snapshots --------------------------------------------------------

    /// Capture the working tree walked by `scanner` into an immutable
    /// snapshot, storing any new objects. The live tree is only read.
    pub fn capture(&self, scanner: &WorktreeScanner) -> Result<Snapshot> {
        let start = Instant::now();
        let entries = scanner.scan()?;
        let worktree = scanner.root().to_path_buf();

        // Store contents in parallel; entries raced away since the scan are dropped
        let stored: Vec<Result<Option<FileEntry>>> = entries
            .into_par_iter()
            .map(|mut entry| -> Result<Option<FileEntry>> {
                if entry.is_directory || entry.is_symlink {
                    return Ok(Some(entry));
                }
                let file_path = worktree.join(&entry.path);
                let content = match fs::read(&file_path) {
                    Ok(content) => content,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                // File may have changed between scan and read; the stored
                // object is authoritative
                let hash = utils::hash_data(&content);
                if hash != entry.content_hash {
                    entry.content_hash = hash;
                    entry.size = content.len() as u64;
                }
                self.store_object(&content, &entry.path)?;
                Ok(Some(entry))
            })
            .collect();

        let mut files = Vec::new();
        for result in stored {
            if let Some(entry) = result? {
                files.push(entry);
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let tree_id = compute_tree_id(&files);
        let total_size: u64 = files.iter().map(|e| e.size).sum();
        let file_count = files.len();

        if !self.manifest_path(&tree_id).exists() {
            let manifest = SnapshotManifest {
                tree_id: tree_id.clone(),
                files,
                total_size,
                file_count,
                created_at: Utc::now(),
            };
            let bytes = bincode::serde::encode_to_vec(&manifest, bincode::config::standard())?;
            utils::atomic_write(&self.manifest_path(&tree_id), &bytes)?;
            debug!(
                "captured snapshot {} ({} entries, {}ms)",
                tree_id.short(),
                file_count,
                start.elapsed().as_millis()
            );
        } else {
            trace!("snapshot {} already stored", tree_id.short());
        }

        Ok(Snapshot {
            tree_id,
            file_count,
            total_size,
            captured_at: Utc::now(),
        })
    }

    /// Load the manifest of a stored snapshot
    pub fn load_manifest(&self, tree_id: &TreeId) -> Result<SnapshotManifest> {
        let path = self.manifest_path(tree_id);
        if !path.exists() {
            return Err(RewindError::SnapshotNotFound(tree_id.0.clone()));
        }
        let bytes = fs::read(&path)?;
        let (manifest, _): (SnapshotManifest, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(manifest)
    }

    fn manifest_path(&self, tree_id: &TreeId) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.bin", tree_id))
    }

    // ---- refs -------------------------------------------------------------

    /// Write (or replace) a named ref
    pub fn write_ref(&self, name: &str, data: &RefData) -> Result<()> {
        let json = serde_json::to_vec(data)?;
        utils::atomic_write(&self.root.join("refs").join(name), &json)?;
        trace!("wrote ref {} -> {}", name, data.tree_id.short());
        Ok(())
    }

    /// Read a ref. Missing or unparsable refs yield `None`, not an error.
    pub fn read_ref(&self, name: &str) -> Option<RefData> {
        let bytes = fs::read(self.root.join("refs").join(name)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Delete a ref if present
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        let path = self.root.join("refs").join(name);
        if path.exists() {
            fs::remove_file(path)?;
            debug!("deleted ref {}", name);
        }
        Ok(())
    }

    /// List all ref names starting with `prefix`
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let refs_dir = self.root.join("refs");
        let mut names = Vec::new();
        if refs_dir.exists() {
            for entry in fs::read_dir(refs_dir)? {
                let name = entry?.file_name().to_string_lossy().to_string();
                if name.starts_with(prefix) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve the tree id behind a ref; `None` when the ref is missing,
    /// unparsable, or points at a snapshot that no longer exists
    pub fn tree_id_of(&self, name: &str) -> Option<TreeId> {
        let data = self.read_ref(name)?;
        if self.manifest_path(&data.tree_id).exists() {
            Some(data.tree_id)
        } else {
            None
        }
    }

    /// True when the snapshot's content matches any of the named targets
    pub fn same_content(&self, snapshot: &Snapshot, targets: &[&str]) -> bool {
        targets
            .iter()
            .filter_map(|name| self.tree_id_of(name))
            .any(|tree_id| tree_id == snapshot.tree_id)
    }

    // ---- restore ----------------------------------------------------------

    /// Overwrite the working tree walked by `scanner` with the content of
    /// `tree_id`, leaving `exclude`d relative paths untouched. Neither a git
    /// index nor HEAD is involved; only file contents change.
    pub fn materialize(
        &self,
        tree_id: &TreeId,
        scanner: &WorktreeScanner,
        exclude: &HashSet<PathBuf>,
    ) -> Result<RestoreStats> {
        let start = Instant::now();
        let manifest = self.load_manifest(tree_id)?;
        let worktree = scanner.root().to_path_buf();

        let mut stats = RestoreStats::default();
        let target: HashMap<&Path, &FileEntry> = manifest
            .files
            .iter()
            .map(|e| (e.path.as_path(), e))
            .collect();

        // Pass 1: delete current entries absent from the target snapshot
        let current = scanner.scan()?;
        let mut dirs_to_check: HashSet<PathBuf> = HashSet::new();
        for entry in &current {
            if target.contains_key(entry.path.as_path()) {
                continue;
            }
            if exclude.contains(&entry.path) {
                stats.files_excluded += 1;
                continue;
            }
            let full = worktree.join(&entry.path);
            if let Some(mut parent) = full.parent().map(Path::to_path_buf) {
                while parent != worktree && parent.starts_with(&worktree) {
                    dirs_to_check.insert(parent.clone());
                    match parent.parent() {
                        Some(p) => parent = p.to_path_buf(),
                        None => break,
                    }
                }
            }
            if entry.is_directory {
                utils::remove_dir_if_empty(&full).ok();
            } else {
                match fs::remove_file(&full) {
                    Ok(()) => {
                        stats.files_deleted += 1;
                        trace!("deleted {:?}", entry.path);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => stats
                        .warnings
                        .push(format!("failed to delete {:?}: {}", entry.path, e)),
                }
            }
        }

        // Deepest first, so nested empty directories unwind
        let mut dirs: Vec<_> = dirs_to_check.into_iter().collect();
        dirs.sort_by(|a, b| b.components().count().cmp(&a.components().count()));
        for dir in dirs {
            if dir != worktree {
                utils::remove_dir_if_empty(&dir).ok();
            }
        }

        // Pass 2: write target entries
        let current_hashes: HashMap<&Path, &str> = current
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| (e.path.as_path(), e.content_hash.as_str()))
            .collect();

        for entry in &manifest.files {
            if exclude.contains(&entry.path) {
                stats.files_excluded += 1;
                continue;
            }
            let full = worktree.join(&entry.path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }

            if entry.is_directory {
                if !full.exists() {
                    fs::create_dir_all(&full)?;
                    utils::set_permissions(&full, entry.permissions)?;
                    stats.files_restored += 1;
                }
            } else if entry.is_symlink {
                if let Some(link_target) = &entry.symlink_target {
                    if full.symlink_metadata().is_ok() {
                        fs::remove_file(&full).ok();
                    }
                    match utils::create_symlink(link_target, &full) {
                        Ok(()) => stats.files_restored += 1,
                        Err(e) => stats.warnings.push(format!(
                            "failed to create symlink {:?} -> {:?}: {}",
                            entry.path, link_target, e
                        )),
                    }
                }
            } else {
                if current_hashes.get(entry.path.as_path()) == Some(&entry.content_hash.as_str()) {
                    continue;
                }
                let content = self.load_object(&entry.content_hash)?;
                fs::write(&full, &content)?;
                utils::set_permissions(&full, entry.permissions)?;
                stats.files_restored += 1;
                stats.bytes_written += content.len() as u64;
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "materialized {} in {}ms ({} written, {} deleted, {} excluded)",
            tree_id.short(),
            stats.duration_ms,
            stats.files_restored,
            stats.files_deleted,
            stats.files_excluded
        );
        Ok(stats)
    }

    // ---- sweep ------------------------------------------------------------

    /// Delete snapshot manifests and objects reachable from no ref.
    /// Returns the number of objects removed.
    pub fn sweep_unreferenced(&self) -> Result<usize> {
        let referenced_trees: HashSet<String> = self
            .list_refs("")?
            .iter()
            .filter_map(|name| self.read_ref(name))
            .map(|data| data.tree_id.0)
            .collect();

        // Drop manifests nothing points at
        let snapshots_dir = self.root.join("snapshots");
        let mut live_hashes: HashSet<String> = HashSet::new();
        if snapshots_dir.exists() {
            for entry in fs::read_dir(&snapshots_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                let tree = name.trim_end_matches(".bin").to_string();
                if referenced_trees.contains(&tree) {
                    if let Ok(manifest) = self.load_manifest(&TreeId(tree)) {
                        live_hashes.extend(
                            manifest
                                .files
                                .iter()
                                .filter(|e| !e.is_directory && !e.content_hash.is_empty())
                                .map(|e| e.content_hash.clone()),
                        );
                    }
                } else {
                    fs::remove_file(entry.path()).ok();
                    trace!("swept manifest {}", tree);
                }
            }
        }

        // Drop objects no live manifest references
        let mut swept = 0usize;
        let objects_dir = self.root.join("objects");
        if objects_dir.exists() {
            for shard in fs::read_dir(&objects_dir)? {
                let shard = shard?;
                if !shard.path().is_dir() {
                    continue;
                }
                let shard_name = shard.file_name().to_string_lossy().to_string();
                for object in fs::read_dir(shard.path())? {
                    let object = object?;
                    let hash = format!("{}{}", shard_name, object.file_name().to_string_lossy());
                    if !live_hashes.contains(&hash) {
                        if fs::remove_file(object.path()).is_ok() {
                            self.object_cache.remove(&hash);
                            swept += 1;
                        }
                    }
                }
                utils::remove_dir_if_empty(&shard.path()).ok();
            }
        }

        if swept > 0 {
            debug!("swept {} unreferenced objects", swept);
        }
        Ok(swept)
    }

    /// Storage statistics, computed from disk and the in-memory cache
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats {
            object_count: 0,
            total_size: 0,
            snapshot_count: 0,
            ref_count: self.list_refs("")?.len(),
        };
        let snapshots_dir = self.root.join("snapshots");
        if snapshots_dir.exists() {
            stats.snapshot_count = fs::read_dir(snapshots_dir)?.count();
        }
        let objects_dir = self.root.join("objects");
        if objects_dir.exists() {
            for shard in fs::read_dir(objects_dir)? {
                let shard = shard?;
                if shard.path().is_dir() {
                    for object in fs::read_dir(shard.path())? {
                        stats.object_count += 1;
                        stats.total_size += object?.metadata()?.len();
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// Tree id over sorted manifest entries: content identity of the whole tree
fn compute_tree_id(files: &[FileEntry]) -> TreeId {
    let mut hasher = Sha256::new();
    for entry in files {
        hasher.update(entry.path.to_string_lossy().as_bytes());
        hasher.update([0]);
        let kind: &[u8] = if entry.is_directory {
            b"d"
        } else if entry.is_symlink {
            b"l"
        } else {
            b"f"
        };
        hasher.update(kind);
        hasher.update([0]);
        hasher.update(entry.permissions.to_le_bytes());
        hasher.update([0]);
        hasher.update(entry.content_hash.as_bytes());
        hasher.update([b'\n']);
    }
    TreeId(hex::encode(hasher.finalize()))
}
