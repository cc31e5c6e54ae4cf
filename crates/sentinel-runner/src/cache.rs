//! Dependency-aware result cache
//!
//! Results are keyed by [`TestTarget::cache_key`] and carry the list of files
//! they were computed from. An entry is only handed out while it is still
//! marked valid, every dependency still exists, and no dependency has been
//! modified after the entry was stored. The check runs on every read, so
//! changes on disk are picked up lazily without a watcher.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use sentinel_core::config::{ProjectConfig, DEFAULT_CACHE_CAPACITY};
use sentinel_core::types::{FileChange, TargetKind, TestResult, TestTarget, RECURSIVE_PATH};

/// File name of the persisted snapshot inside the cache directory
pub const SNAPSHOT_FILE: &str = "results.json";

/// A cached result plus the dependency metadata it is contingent on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult<R> {
    /// The stored result
    pub result: R,
    /// When the result was stored
    pub cache_time: DateTime<Utc>,
    /// Files this result depends on
    pub dependencies: Vec<PathBuf>,
    /// SHA-256 over (path, modification time) of every dependency at store time
    pub dependency_hash: String,
    /// Cleared by [`ResultCache::invalidate`]
    pub is_valid: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of stored entries
    pub total_entries: usize,
    /// Entries still flagged valid
    pub valid_entries: usize,
    /// Entries flagged invalid but not yet evicted
    pub invalid_entries: usize,
    /// `valid / (valid + invalid)`; an approximation, not a historical hit rate
    pub hit_rate: f64,
    /// Oldest `cache_time`
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest `cache_time`
    pub newest_entry: Option<DateTime<Utc>>,
    /// Configured capacity
    pub capacity: usize,
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache directory could not be created
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
struct CacheState<R> {
    results: HashMap<String, CachedResult<R>>,
    /// Last known modification time per dependency, refreshed on every store
    file_times: HashMap<PathBuf, DateTime<Utc>>,
}

impl<R> Default for CacheState<R> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            file_times: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot<R> {
    results: BTreeMap<String, CachedResult<R>>,
    file_times: BTreeMap<PathBuf, DateTime<Utc>>,
}

/// Bounded, thread-safe result cache.
///
/// All state lives behind one read/write lock owned by the cache; callers only
/// ever receive cloned snapshots of entries.
#[derive(Debug)]
pub struct ResultCache<R = TestResult> {
    state: RwLock<CacheState<R>>,
    capacity: usize,
    root_dir: PathBuf,
    source_extension: String,
    lock_files: Vec<String>,
    storage_dir: Option<PathBuf>,
}

impl<R: Clone> ResultCache<R> {
    /// Create an in-memory cache rooted at the current directory.
    ///
    /// A capacity of zero falls back to the default of 1000 entries.
    pub fn new(capacity: usize) -> Self {
        let project = ProjectConfig::default();
        let capacity = if capacity == 0 {
            DEFAULT_CACHE_CAPACITY
        } else {
            capacity
        };
        Self {
            state: RwLock::new(CacheState::default()),
            capacity,
            root_dir: PathBuf::from("."),
            source_extension: project.source_extension,
            lock_files: project.lock_files,
            storage_dir: None,
        }
    }

    /// Resolve relative target and change paths against `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = root.into();
        self
    }

    /// Use the project's source extension and lock files for dependency discovery
    pub fn with_project(mut self, project: &ProjectConfig) -> Self {
        self.source_extension = project.source_extension.clone();
        self.lock_files = project.lock_files.clone();
        self
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, valid or not
    pub fn len(&self) -> usize {
        self.read().results.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Project root used to resolve relative paths
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Look up a usable result for a target.
    ///
    /// Returns `None` when nothing is stored, when the entry was invalidated,
    /// or when any dependency is missing or newer than the entry.
    pub fn get(&self, target: &TestTarget) -> Option<CachedResult<R>> {
        let key = target.cache_key();
        let state = self.read();

        let Some(cached) = state.results.get(&key) else {
            debug!(target = %key, "cache miss");
            return None;
        };

        if !is_usable(cached) {
            debug!(target = %key, "cache entry stale");
            return None;
        }

        debug!(target = %key, "cache hit");
        Some(cached.clone())
    }

    /// Store a result for a target, replacing any previous entry
    pub fn put(&self, target: &TestTarget, result: R) {
        self.put_at(target, result, Utc::now());
    }

    pub(crate) fn put_at(&self, target: &TestTarget, result: R, cache_time: DateTime<Utc>) {
        let key = target.cache_key();
        let dependencies = self.discover_dependencies(target);
        let dependency_hash = dependency_hash(&dependencies);

        let mut state = self.write();
        if !state.results.contains_key(&key) {
            enforce_capacity(&mut state.results, self.capacity);
        }

        for dep in &dependencies {
            if let Some(modified) = modified_time(dep) {
                state.file_times.insert(dep.clone(), modified);
            }
        }

        debug!(
            target = %key,
            dependencies = dependencies.len(),
            "storing result in cache"
        );
        state.results.insert(
            key,
            CachedResult {
                result,
                cache_time,
                dependencies,
                dependency_hash,
                is_valid: true,
            },
        );
    }

    /// Mark every entry depending on a changed file as invalid.
    ///
    /// An entry is also invalidated when one of its dependencies was modified
    /// after the last recorded time for that file. Returns the number of
    /// entries newly invalidated.
    pub fn invalidate(&self, changes: &[FileChange]) -> usize {
        let changed: HashSet<PathBuf> = changes.iter().map(|c| self.resolve(&c.path)).collect();

        let mut state = self.write();
        let CacheState {
            results,
            file_times,
        } = &mut *state;

        let mut invalidated = 0;
        for (key, cached) in results.iter_mut() {
            if !cached.is_valid {
                continue;
            }

            let stale = cached.dependencies.iter().any(|dep| {
                if changed.contains(dep) {
                    return true;
                }
                match (modified_time(dep), file_times.get(dep)) {
                    (Some(current), Some(recorded)) => current > *recorded,
                    _ => false,
                }
            });

            if stale {
                debug!(target = %key, "invalidating cache entry");
                cached.is_valid = false;
                invalidated += 1;
            }
        }

        if invalidated > 0 {
            info!(
                changes = changes.len(),
                invalidated, "invalidated cached results"
            );
        }
        invalidated
    }

    /// Drop all entries and tracking state
    pub fn clear(&self) {
        let mut state = self.write();
        state.results.clear();
        state.file_times.clear();
        info!("cache cleared");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        let mut stats = CacheStats {
            capacity: self.capacity,
            ..Default::default()
        };

        for cached in state.results.values() {
            if cached.is_valid {
                stats.valid_entries += 1;
            } else {
                stats.invalid_entries += 1;
            }

            let time = cached.cache_time;
            stats.oldest_entry = Some(stats.oldest_entry.map_or(time, |t| t.min(time)));
            stats.newest_entry = Some(stats.newest_entry.map_or(time, |t| t.max(time)));
        }

        stats.total_entries = stats.valid_entries + stats.invalid_entries;
        if stats.total_entries > 0 {
            stats.hit_rate = stats.valid_entries as f64 / stats.total_entries as f64;
        }
        stats
    }

    /// Discover the files a target's result depends on.
    ///
    /// Lock files are universal dependencies. Package targets add their
    /// directory's source files, file targets add the file and its siblings.
    /// Recursive targets stop at the lock files: walking the whole tree is
    /// unbounded, and global changes are invalidated coarsely anyway.
    pub fn discover_dependencies(&self, target: &TestTarget) -> Vec<PathBuf> {
        let mut dependencies: Vec<PathBuf> = self
            .lock_files
            .iter()
            .map(|name| self.root_dir.join(name))
            .filter(|path| path.exists())
            .collect();

        match target.kind {
            TargetKind::Package => {
                if target.path != RECURSIVE_PATH {
                    let dir = self.resolve(Path::new(&target.path));
                    dependencies.extend(self.source_files_in(&dir));
                }
            }
            TargetKind::File => {
                let file = self.resolve(Path::new(&target.path));
                if let Some(dir) = file.parent() {
                    let siblings: Vec<PathBuf> = self
                        .source_files_in(dir)
                        .into_iter()
                        .filter(|sibling| *sibling != file)
                        .collect();
                    dependencies.push(file.clone());
                    dependencies.extend(siblings);
                } else {
                    dependencies.push(file);
                }
            }
            TargetKind::Recursive => {}
        }

        dependencies
    }

    fn source_files_in(&self, dir: &Path) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/*{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            self.source_extension
        );
        match glob::glob(&pattern) {
            Ok(paths) => paths.flatten().filter(|p| p.is_file()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState<R>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState<R>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R> ResultCache<R>
where
    R: Clone + Serialize + DeserializeOwned,
{
    /// Open a cache persisted under `dir`, creating the directory if needed.
    ///
    /// A previously saved snapshot is loaded; its entries are re-validated on
    /// read like any other entry.
    pub fn open(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let mut cache = Self::new(capacity);
        cache.storage_dir = Some(dir);
        cache.load()?;
        Ok(cache)
    }

    /// Directory the snapshot is persisted to, if any
    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    fn load(&self) -> Result<(), CacheError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        if !path.exists() {
            debug!(path = %path.display(), "no cache snapshot found");
            return Ok(());
        }

        let contents = fs::read_to_string(&path)?;
        let snapshot: Snapshot<R> = match serde_json::from_str(&contents) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable cache snapshot"
                );
                return Ok(());
            }
        };

        let mut entries: Vec<(String, CachedResult<R>)> = snapshot.results.into_iter().collect();
        if entries.len() > self.capacity {
            entries.sort_by(|a, b| b.1.cache_time.cmp(&a.1.cache_time));
            entries.truncate(self.capacity);
        }

        let mut state = self.write();
        state.results = entries.into_iter().collect();
        state.file_times = snapshot.file_times.into_iter().collect();
        info!(
            path = %path.display(),
            entries = state.results.len(),
            "loaded cache snapshot"
        );
        Ok(())
    }

    /// Write the current entries to the snapshot file.
    ///
    /// The snapshot is written next to the target and renamed over it, so a
    /// reader never sees a partial file. A cache without a storage directory
    /// has nothing to persist.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };

        let snapshot = {
            let state = self.read();
            Snapshot {
                results: state
                    .results
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                file_times: state
                    .file_times
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect(),
            }
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &path)?;
        debug!(
            path = %path.display(),
            entries = snapshot.results.len(),
            "saved cache snapshot"
        );
        Ok(())
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.storage_dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }
}

fn is_usable<R>(cached: &CachedResult<R>) -> bool {
    cached.is_valid
        && cached
            .dependencies
            .iter()
            .all(|dep| matches!(modified_time(dep), Some(modified) if modified <= cached.cache_time))
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn dependency_hash(dependencies: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    for dep in dependencies {
        if let Some(modified) = modified_time(dep) {
            hasher.update(dep.to_string_lossy().as_bytes());
            hasher.update(modified.to_rfc3339().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Evict the oldest quarter of entries once the cache is full.
///
/// Eviction happens in batches so the selection cost is amortized over
/// many inserts.
fn enforce_capacity<R>(results: &mut HashMap<String, CachedResult<R>>, capacity: usize) {
    if results.len() < capacity {
        return;
    }

    let remove_count = (capacity / 4).max(1);
    let mut by_age: Vec<(DateTime<Utc>, String)> = results
        .iter()
        .map(|(key, cached)| (cached.cache_time, key.clone()))
        .collect();

    if remove_count < by_age.len() {
        by_age.select_nth_unstable_by_key(remove_count, |(time, _)| *time);
        by_age.truncate(remove_count);
    }

    debug!(evicted = by_age.len(), capacity, "evicting oldest cache entries");
    for (_, key) in by_age {
        results.remove(&key);
    }
}
