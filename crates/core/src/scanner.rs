//! Walks the incoming root and lists candidate media files in a stable order.

use crate::error::{Result, SiftError};
use crate::models::FileRecord;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Lowercase, without the leading dot. Empty accepts every extension.
    pub extensions: Vec<String>,
    pub excludes: Vec<String>,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn new(extensions: &[String], excludes: &[String], limit: Option<usize>) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excludes: excludes.to_vec(),
            limit,
        }
    }
}

/// Files under `root`, sorted by relative path. Hidden entries and excluded
/// globs are skipped; unreadable entries are logged and skipped.
pub fn discover(root: &Path, opts: &ScanOptions) -> Result<Vec<FileRecord>> {
    let exclude_set = build_globset(&opts.excludes)?;
    let mut records = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), root, &exclude_set));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_wanted_extension(path, &opts.extensions) {
            continue;
        }
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "stat failed during scan");
                continue;
            }
        };
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        records.push(FileRecord {
            path: path.to_path_buf(),
            relative,
            size: meta.len(),
            mtime_ns: mtime_ns(&meta),
        });
    }

    records.sort_by(|a, b| a.relative.cmp(&b.relative));
    if let Some(limit) = opts.limit {
        records.truncate(limit);
    }
    debug!(root = %root.display(), count = records.len(), "scan finished");
    Ok(records)
}

pub fn mtime_ns(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| SiftError::config(format!("bad exclude glob {pat:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SiftError::config(format!("exclude globs: {e}")))
}

fn should_descend(path: &Path, root: &Path, excludes: &GlobSet) -> bool {
    !is_hidden(path) && !is_excluded(path, root, excludes)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, root: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
        || path
            .strip_prefix(root)
            .map(|rel| excludes.is_match(rel))
            .unwrap_or(false)
}

fn has_wanted_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Full-file blake3, hex encoded.
pub fn full_hash(path: &Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"data").unwrap();
    }

    fn rels(records: &[FileRecord]) -> Vec<PathBuf> {
        records.iter().map(|r| r.relative.clone()).collect()
    }

    #[test]
    fn sorted_filtered_listing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "b.mkv");
        touch(root, "a/z.MP4");
        touch(root, "a/notes.txt");
        touch(root, ".hidden/c.mkv");
        touch(root, "d/.partial.mkv");
        touch(root, "skip/e.mkv");

        let opts = ScanOptions::new(
            &["mkv".into(), ".mp4".into()],
            &["skip/**".into()],
            None,
        );
        let records = discover(root, &opts).unwrap();
        assert_eq!(
            rels(&records),
            vec![PathBuf::from("a/z.MP4"), PathBuf::from("b.mkv")]
        );
        assert_eq!(records[1].size, 4);
        assert!(records[1].mtime_ns > 0);
    }

    #[test]
    fn limit_applies_after_sorting() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.mkv", "a.mkv", "b.mkv"] {
            touch(dir.path(), name);
        }
        let opts = ScanOptions::new(&["mkv".into()], &[], Some(2));
        let records = discover(dir.path(), &opts).unwrap();
        assert_eq!(
            rels(&records),
            vec![PathBuf::from("a.mkv"), PathBuf::from("b.mkv")]
        );
    }

    #[test]
    fn bad_glob_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ScanOptions::new(&[], &["a[".into()], None);
        assert!(matches!(
            discover(dir.path(), &opts),
            Err(SiftError::Config(_))
        ));
    }

    #[test]
    fn hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.mkv");
        fs::write(&p, b"one").unwrap();
        let a = full_hash(&p).unwrap();
        fs::write(&p, b"two").unwrap();
        assert_ne!(a, full_hash(&p).unwrap());
        assert_eq!(a.len(), 64);
    }
}
