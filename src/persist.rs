//! Where crawl output and the faculty cache end up.

use crate::cache::DedupCache;
use crate::compass::json::decode_json;
use crate::compass::{Course, FacultyProfile};
use crate::scraper::TermDataset;
use crate::utils::log_if_slow;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Faculty profiles keyed by display name, as stored between runs.
pub type CacheSnapshot = BTreeMap<String, FacultyProfile>;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Store the full dataset of a term.
    async fn write_term_dataset(&self, dataset: &TermDataset) -> anyhow::Result<()>;

    /// Store the courses of one department as soon as it is merged.
    async fn write_department(
        &self,
        term: &str,
        dept: &str,
        courses: &BTreeMap<String, Course>,
    ) -> anyhow::Result<()>;

    async fn write_cache_snapshot(&self, snapshot: &CacheSnapshot) -> anyhow::Result<()>;

    /// Previously stored snapshot, or an empty one if none exists.
    async fn load_cache_snapshot(&self) -> anyhow::Result<CacheSnapshot>;
}

/// JSON files under a data directory:
///
/// ```text
/// <root>/cache.json
/// <root>/<term>/courses.json
/// <root>/<term>/<DEPT>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

const SLOW_WRITE: Duration = Duration::from_secs(1);

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join("cache.json")
    }

    pub fn term_dir(&self, term: &str) -> PathBuf {
        self.root.join(path_component(term))
    }

    pub fn dataset_path(&self, term: &str) -> PathBuf {
        self.term_dir(term).join("courses.json")
    }

    pub fn department_path(&self, term: &str, dept: &str) -> PathBuf {
        self.term_dir(term)
            .join(format!("{}.json", path_component(dept)))
    }
}

#[async_trait]
impl Persistence for JsonStore {
    async fn write_term_dataset(&self, dataset: &TermDataset) -> anyhow::Result<()> {
        let path = self.dataset_path(&dataset.term);
        write_json_atomic(&path, dataset).await?;
        info!(
            term = dataset.term.as_str(),
            courses = dataset.course_count(),
            path = %path.display(),
            "Wrote term dataset"
        );
        Ok(())
    }

    async fn write_department(
        &self,
        term: &str,
        dept: &str,
        courses: &BTreeMap<String, Course>,
    ) -> anyhow::Result<()> {
        let path = self.department_path(term, dept);
        write_json_atomic(&path, courses).await?;
        debug!(term, dept, courses = courses.len(), "Wrote department file");
        Ok(())
    }

    async fn write_cache_snapshot(&self, snapshot: &CacheSnapshot) -> anyhow::Result<()> {
        write_json_atomic(&self.cache_path(), snapshot).await
    }

    async fn load_cache_snapshot(&self) -> anyhow::Result<CacheSnapshot> {
        let path = self.cache_path();
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot found");
                return Ok(CacheSnapshot::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        if body.trim().is_empty() {
            return Ok(CacheSnapshot::new());
        }
        decode_json(&body).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Serialize `value` next to `path` and rename it into place.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let start = Instant::now();
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

    log_if_slow(start, SLOW_WRITE, "json write");
    Ok(())
}

/// Keep term and department codes from escaping their directory.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_owned()
    } else {
        cleaned
    }
}

/// Writes the faculty cache when it has changed since the last write.
///
/// Shared by the scheduler (after every department) and the periodic flush
/// task. Flushes are serialized so an older snapshot never overwrites a newer
/// one.
pub struct CacheFlusher {
    cache: Arc<DedupCache<FacultyProfile>>,
    store: Arc<dyn Persistence>,
    flushed_revision: Mutex<u64>,
}

impl CacheFlusher {
    /// The cache's current revision counts as already persisted.
    pub fn new(cache: Arc<DedupCache<FacultyProfile>>, store: Arc<dyn Persistence>) -> Self {
        let flushed_revision = Mutex::new(cache.revision());
        Self {
            cache,
            store,
            flushed_revision,
        }
    }

    pub fn cache(&self) -> &Arc<DedupCache<FacultyProfile>> {
        &self.cache
    }

    /// Write a snapshot if anything resolved since the last flush.
    ///
    /// Returns whether a snapshot was written.
    pub async fn flush(&self) -> anyhow::Result<bool> {
        let mut flushed = self.flushed_revision.lock().await;
        let revision = self.cache.revision();
        if revision == *flushed {
            return Ok(false);
        }

        let snapshot = self.cache.snapshot();
        self.store
            .write_cache_snapshot(&snapshot)
            .await
            .context("Failed to write cache snapshot")?;
        *flushed = revision;
        debug!(entries = snapshot.len(), revision, "Flushed faculty cache");
        Ok(true)
    }
}
