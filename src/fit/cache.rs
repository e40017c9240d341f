//! Cache validation and storage of fit results.
//!
//! Two layers:
//!
//! - on disk: one JSON artifact per (target, model family), trusted only while
//!   it is newer than both the rawphot file and the sampler marker file
//! - in memory: a bounded LRU keyed by (rawphot path, components), whose
//!   entries can be invalidated explicitly

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::domain::{FitResult, FittingConfig};
use crate::error::AppError;

/// Outcome of a cache validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Valid,
    Stale,
}

/// Modification time, or `None` if the file is missing or unreadable.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// `Valid` iff the artifact exists and is strictly newer than both the input
/// file and the sampler marker. Any missing file, or `force`, means `Stale`.
pub fn check(artifact: &Path, input: &Path, marker: &Path, force: bool) -> CacheStatus {
    if force {
        return CacheStatus::Stale;
    }
    let (Some(t_artifact), Some(t_input), Some(t_marker)) = (mtime(artifact), mtime(input), mtime(marker))
    else {
        return CacheStatus::Stale;
    };
    if t_artifact > t_input && t_artifact > t_marker {
        CacheStatus::Valid
    } else {
        CacheStatus::Stale
    }
}

/// True when a derived file is missing or older than `reference`.
pub fn needs_refresh(path: &Path, reference: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    match (mtime(path), mtime(reference)) {
        (Some(t_path), Some(t_ref)) => t_path < t_ref,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// Load a stored result and point its path metadata at `rawphot`.
pub fn load(artifact: &Path, rawphot: &Path, fitting: &FittingConfig) -> Result<FitResult, AppError> {
    let file = File::open(artifact).map_err(|e| {
        AppError::cache(format!("Failed to open cache '{}': {e}", artifact.display()))
    })?;
    let mut result: FitResult = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        AppError::cache(format!("Invalid cache '{}': {e}", artifact.display()))
    })?;
    result.refresh_file_info(rawphot, fitting);
    Ok(result)
}

/// Write a result to its artifact path.
///
/// The file is written beside the artifact and renamed into place, with its
/// mtime set to the result's completion time.
pub fn store(result: &FitResult) -> Result<(), AppError> {
    let artifact = &result.locator.artifact;
    let tmp = tmp_path(artifact);

    let file = File::create(&tmp).map_err(|e| {
        AppError::cache(format!("Failed to create cache '{}': {e}", tmp.display()))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)
        .map_err(|e| AppError::cache(format!("Failed to write cache: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::cache(format!("Failed to write cache: {e}")))?;

    let file = writer
        .into_inner()
        .map_err(|e| AppError::cache(format!("Failed to write cache: {e}")))?;
    file.set_modified(SystemTime::from(result.completed_at))
        .map_err(|e| AppError::cache(format!("Failed to set cache mtime: {e}")))?;
    drop(file);

    if let Err(e) = std::fs::rename(&tmp, artifact) {
        let _ = std::fs::remove_file(&tmp);
        return Err(AppError::cache(format!(
            "Failed to move cache into place '{}': {e}",
            artifact.display()
        )));
    }
    Ok(())
}

fn tmp_path(artifact: &Path) -> PathBuf {
    let mut s = artifact.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Key of an in-memory cache entry.
pub type CacheKey = (PathBuf, Vec<String>);

/// Bounded LRU of computed results.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    entries: HashMap<CacheKey, FitResult>,
    // Front is least recently used.
    order: VecDeque<CacheKey>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<&FitResult> {
        if self.entries.contains_key(key) {
            self.touch(key);
        }
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: CacheKey, result: FitResult) {
        if self.entries.insert(key.clone(), result).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> Option<FitResult> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Drop every entry for one rawphot file.
    pub fn invalidate_target(&mut self, rawphot: &Path) {
        self.entries.retain(|(p, _), _| p != rawphot);
        self.order.retain(|(p, _)| p != rawphot);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::testkit;
    use std::time::Duration;

    fn touch_at(path: &Path, t: SystemTime) {
        let f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.set_modified(t).unwrap();
    }

    #[test]
    fn valid_only_when_newer_than_input_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (artifact, input, marker) = (
            dir.path().join("a.json"),
            dir.path().join("x-rawphot.txt"),
            dir.path().join("m"),
        );
        let t0 = SystemTime::now() - Duration::from_secs(100);

        touch_at(&input, t0);
        touch_at(&marker, t0 + Duration::from_secs(10));
        assert_eq!(check(&artifact, &input, &marker, false), CacheStatus::Stale);

        touch_at(&artifact, t0 + Duration::from_secs(20));
        assert_eq!(check(&artifact, &input, &marker, false), CacheStatus::Valid);
        assert_eq!(check(&artifact, &input, &marker, true), CacheStatus::Stale);

        // Touching the input invalidates.
        touch_at(&input, t0 + Duration::from_secs(30));
        assert_eq!(check(&artifact, &input, &marker, false), CacheStatus::Stale);

        // Touching an unrelated file does not.
        touch_at(&input, t0);
        touch_at(&dir.path().join("unrelated"), t0 + Duration::from_secs(50));
        assert_eq!(check(&artifact, &input, &marker, false), CacheStatus::Valid);

        // Equal times are not "newer".
        touch_at(&marker, t0 + Duration::from_secs(20));
        assert_eq!(check(&artifact, &input, &marker, false), CacheStatus::Stale);
    }

    #[test]
    fn missing_marker_forces_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let (artifact, input) = (dir.path().join("a.json"), dir.path().join("in"));
        touch_at(&input, SystemTime::now() - Duration::from_secs(10));
        touch_at(&artifact, SystemTime::now());
        assert_eq!(
            check(&artifact, &input, &dir.path().join("missing"), false),
            CacheStatus::Stale
        );
    }

    #[test]
    fn derived_files_refresh_when_missing_or_older() {
        let dir = tempfile::tempdir().unwrap();
        let (derived, reference) = (dir.path().join("corner.csv"), dir.path().join("marker"));
        let t0 = SystemTime::now() - Duration::from_secs(100);

        touch_at(&reference, t0);
        assert!(needs_refresh(&derived, &reference, false));

        touch_at(&derived, t0 + Duration::from_secs(1));
        assert!(!needs_refresh(&derived, &reference, false));
        assert!(needs_refresh(&derived, &reference, true));

        touch_at(&reference, t0 + Duration::from_secs(2));
        assert!(needs_refresh(&derived, &reference, false));
    }

    #[test]
    fn store_then_load_round_trips_and_refreshes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fitting = FittingConfig::default();
        let raw = dir.path().join("old").join("T-rawphot.txt");
        let result = testkit::sample_result(&raw, &fitting);
        std::fs::create_dir_all(&result.locator.sampler_dir).unwrap();

        store(&result).unwrap();
        let stored_mtime = mtime(&result.locator.artifact).unwrap();
        assert_eq!(stored_mtime, SystemTime::from(result.completed_at));

        let loaded = load(&result.locator.artifact, &raw, &fitting).unwrap();
        assert_eq!(loaded, result);

        // Same artifact, read as if the target had moved.
        let moved = dir.path().join("new").join("T-rawphot.txt");
        let relocated = load(&result.locator.artifact, &moved, &fitting).unwrap();
        assert_eq!(relocated.rawphot, moved);
        assert_eq!(relocated.locator.path, dir.path().join("new"));
        assert_eq!(relocated.evidence, result.evidence);
    }

    #[test]
    fn corrupt_artifact_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("bad.json");
        std::fs::write(&artifact, "{not json").unwrap();
        let err = load(&artifact, &dir.path().join("x"), &FittingConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cache);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let fitting = FittingConfig::default();
        let r = testkit::sample_result(Path::new("/t/T-rawphot.txt"), &fitting);
        let key = |s: &str| (PathBuf::from(s), vec!["c".to_string()]);

        let mut cache = ResultCache::new(2);
        cache.insert(key("a"), r.clone());
        cache.insert(key("b"), r.clone());
        assert!(cache.get(&key("a")).is_some());
        cache.insert(key("c"), r.clone());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());

        assert!(cache.invalidate(&key("a")).is_some());
        assert!(cache.get(&key("a")).is_none());

        cache.insert(key("a"), r);
        cache.invalidate_target(Path::new("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
