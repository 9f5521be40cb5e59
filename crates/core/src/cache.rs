use crate::config::CacheKeyMode;
use crate::error::{Result, SiftError};
use crate::scanner::{full_hash, mtime_ns};
use probe::{MediaProber, ProbeError, RawProbe};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::models::CacheRow;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub corrupt: usize,
    pub probe_failures: usize,
}

/// What a cache row must agree with to be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileIdentity {
    size: i64,
    mtime_ns: i64,
    content_hash: Option<String>,
}

impl FileIdentity {
    fn matches(&self, row: &CacheRow) -> bool {
        row.size == self.size
            && row.mtime_ns == self.mtime_ns
            && (self.content_hash.is_none() || row.content_hash == self.content_hash)
    }
}

/// Persistent probe results keyed by path. Owned by one run; `&mut self`
/// keeps writes single-threaded.
pub struct ProbeCache {
    pool: SqlitePool,
    prober: Arc<dyn MediaProber>,
    rescan: bool,
    key_mode: CacheKeyMode,
    stats: CacheStats,
}

impl ProbeCache {
    pub async fn open(
        db_path: &Path,
        prober: Arc<dyn MediaProber>,
        rescan: bool,
        key_mode: CacheKeyMode,
    ) -> Result<Self> {
        let pool = storage::connect(&db_path.to_string_lossy())
            .await
            .map_err(SiftError::Storage)?;
        storage::migrate(&pool).await.map_err(SiftError::Storage)?;
        Ok(Self::from_pool(pool, prober, rescan, key_mode))
    }

    pub fn from_pool(
        pool: SqlitePool,
        prober: Arc<dyn MediaProber>,
        rescan: bool,
        key_mode: CacheKeyMode,
    ) -> Self {
        Self {
            pool,
            prober,
            rescan,
            key_mode,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Rows currently stored, across all runs.
    pub async fn entries(&self) -> Result<i64> {
        storage::cache::count(&self.pool)
            .await
            .map_err(SiftError::Storage)
    }

    #[cfg(test)]
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cached probe when the file is unchanged, otherwise a fresh probe that is
    /// stored before returning.
    pub async fn get_or_probe(&mut self, path: &Path) -> Result<RawProbe> {
        let identity = self.identify(path).await.map_err(|cause| {
            self.stats.probe_failures += 1;
            SiftError::ProbeFailure {
                path: path.to_path_buf(),
                cause,
            }
        })?;
        let key = path.to_string_lossy().into_owned();

        if !self.rescan {
            let row = storage::cache::get(&self.pool, &key)
                .await
                .map_err(SiftError::Storage)?;
            if let Some(row) = row.filter(|r| identity.matches(r)) {
                match decode(path, &row) {
                    Ok(raw) => {
                        self.stats.hits += 1;
                        debug!(path = %path.display(), "probe cache hit");
                        return Ok(raw);
                    }
                    Err(err) => {
                        self.stats.corrupt += 1;
                        warn!(error = %err, "discarding corrupt cache entry");
                    }
                }
            }
        }

        self.stats.misses += 1;
        let raw = self.prober.probe(path).await.map_err(|cause| {
            self.stats.probe_failures += 1;
            SiftError::ProbeFailure {
                path: path.to_path_buf(),
                cause,
            }
        })?;

        let row = CacheRow {
            path: key,
            size: identity.size,
            mtime_ns: identity.mtime_ns,
            content_hash: identity.content_hash,
            probe_json: serde_json::to_string(&raw)
                .map_err(|e| SiftError::Storage(anyhow::Error::new(e)))?,
            probed_at: chrono::Utc::now().to_rfc3339(),
        };
        storage::cache::upsert(&self.pool, &row)
            .await
            .map_err(SiftError::Storage)?;
        debug!(path = %path.display(), "probed and cached");
        Ok(raw)
    }

    async fn identify(&self, path: &Path) -> std::result::Result<FileIdentity, ProbeError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ProbeError::Other(format!("stat failed: {e}")))?;
        if !meta.is_file() {
            return Err(ProbeError::Other("not a regular file".into()));
        }
        let content_hash = match self.key_mode {
            CacheKeyMode::Stat => None,
            CacheKeyMode::Content => {
                let owned: PathBuf = path.to_path_buf();
                let hash = tokio::task::spawn_blocking(move || full_hash(&owned))
                    .await
                    .map_err(|e| ProbeError::Other(format!("hash task failed: {e}")))?
                    .map_err(|e| ProbeError::Other(format!("hash failed: {e}")))?;
                Some(hash)
            }
        };
        Ok(FileIdentity {
            size: meta.len() as i64,
            mtime_ns: mtime_ns(&meta),
            content_hash,
        })
    }
}

fn decode(path: &Path, row: &CacheRow) -> Result<RawProbe> {
    serde_json::from_str(&row.probe_json).map_err(|e| SiftError::CacheCorruption {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe::fixture::FixtureProber;
    use probe::StreamDescriptor;
    use std::fs;

    fn sample() -> RawProbe {
        RawProbe::with_streams(vec![
            StreamDescriptor::video(0, "hevc", 3840, 2160),
            StreamDescriptor::audio(1, "eac3", 6),
        ])
    }

    async fn setup(
        dir: &Path,
        prober: Arc<FixtureProber>,
        rescan: bool,
        mode: CacheKeyMode,
    ) -> ProbeCache {
        ProbeCache::open(&dir.join("cache.db"), prober, rescan, mode)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"frames").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));

        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;
        assert_eq!(cache.get_or_probe(&file).await.unwrap(), sample());
        assert_eq!(cache.get_or_probe(&file).await.unwrap(), sample());
        assert_eq!(prober.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);

        // A fresh cache over the same database still hits.
        let mut reopened = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;
        reopened.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn size_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"frames").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;

        cache.get_or_probe(&file).await.unwrap();
        fs::write(&file, b"more frames").unwrap();
        cache.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test]
    async fn mtime_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"frames").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;

        cache.get_or_probe(&file).await.unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(120);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        cache.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test]
    async fn rescan_always_probes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"frames").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));

        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;
        cache.get_or_probe(&file).await.unwrap();
        let mut rescan = setup(dir.path(), prober.clone(), true, CacheKeyMode::Stat).await;
        rescan.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test]
    async fn corrupt_row_is_reprobed_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"frames").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;
        cache.get_or_probe(&file).await.unwrap();

        sqlx::query("UPDATE probe_cache SET probe_json = '{not json'")
            .execute(cache.pool())
            .await
            .unwrap();

        assert_eq!(cache.get_or_probe(&file).await.unwrap(), sample());
        assert_eq!(cache.get_or_probe(&file).await.unwrap(), sample());
        assert_eq!(prober.calls(), 2);
        assert_eq!(cache.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn probe_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.mkv");
        fs::write(&file, b"junk").unwrap();
        let prober = Arc::new(FixtureProber::new().with_failure("broken.mkv", "invalid data"));
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;

        let err = cache.get_or_probe(&file).await.unwrap_err();
        assert!(matches!(err, SiftError::ProbeFailure { .. }));
        assert!(!err.is_fatal());
        assert_eq!(cache.entries().await.unwrap(), 0);

        prober.set("broken.mkv", Ok(sample()));
        cache.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 2);
        assert_eq!(cache.entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_probe_failure() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(FixtureProber::new());
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Stat).await;
        let err = cache
            .get_or_probe(&dir.path().join("nope.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, SiftError::ProbeFailure { .. }));
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn content_mode_detects_same_size_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"aaaa").unwrap();
        let prober = Arc::new(FixtureProber::new().with("movie.mkv", sample()));
        let mut cache = setup(dir.path(), prober.clone(), false, CacheKeyMode::Content).await;
        cache.get_or_probe(&file).await.unwrap();

        let before = fs::metadata(&file).unwrap().modified().unwrap();
        fs::write(&file, b"bbbb").unwrap();
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(before)
            .unwrap();

        cache.get_or_probe(&file).await.unwrap();
        assert_eq!(prober.calls(), 2);
    }
}
