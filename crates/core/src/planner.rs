use crate::config::{AppConfig, ExistingPolicy, MediaTypeStrategy, TransferMode};
use crate::error::{Result, SiftError};
use crate::models::{MediaType, NormalizedAttributes};
use crate::naming::{self, CanonicalName};
use crate::rules::{RuleTable, TierRule};
use crate::samples::SampleReason;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Filesystem operations the planner and executor need. Nothing else in the
/// crate mutates the intake tree.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    /// Files directly inside `dir`.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Copy,
    Move,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Conflict {
    None,
    SkippedExisting,
    Overwritten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Executed,
    Skipped,
    Failed,
}

/// Everything decided about one file, in the shape the report serializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub source: PathBuf,
    pub relative_path: PathBuf,
    pub media_type: Option<MediaType>,
    pub tier: Option<String>,
    pub attributes: Option<NormalizedAttributes>,
    pub canonical_name: Option<String>,
    pub destination: Option<PathBuf>,
    pub action: Action,
    pub conflict: Conflict,
    pub outcome: Outcome,
    pub performed: bool,
    pub reason: Option<String>,
    pub existing_path: Option<PathBuf>,
}

impl DecisionRecord {
    /// Record for a file that failed before a tier could be assigned.
    pub fn failed(source: &Path, relative: &Path, reason: impl Into<String>) -> Self {
        Self {
            source: source.to_path_buf(),
            relative_path: relative.to_path_buf(),
            media_type: None,
            tier: None,
            attributes: None,
            canonical_name: None,
            destination: None,
            action: Action::Skip,
            conflict: Conflict::None,
            outcome: Outcome::Failed,
            performed: false,
            reason: Some(reason.into()),
            existing_path: None,
        }
    }

    fn skip(&mut self, reason: &str) {
        self.action = Action::Skip;
        self.outcome = Outcome::Skipped;
        self.reason = Some(reason.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub intake_root: PathBuf,
    pub mode: TransferMode,
    pub existing: ExistingPolicy,
}

impl From<&AppConfig> for PlannerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            intake_root: cfg.paths.intake_root.clone(),
            mode: cfg.io.mode,
            existing: cfg.io.existing,
        }
    }
}

/// A classified and named file waiting for a destination decision.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub source: &'a Path,
    pub relative: &'a Path,
    pub media_type: Option<MediaType>,
    pub tier: &'a TierRule,
    pub attributes: NormalizedAttributes,
    pub name: CanonicalName,
    /// Set when the file should be routed but not transferred.
    pub skip_reason: Option<SampleReason>,
}

pub fn destination_dir(
    intake_root: &Path,
    media_type: Option<MediaType>,
    tier: &TierRule,
) -> PathBuf {
    let mut dir = intake_root.to_path_buf();
    if let Some(mt) = media_type {
        dir.push(mt.dir_name());
    }
    dir.push(&tier.folder);
    dir
}

/// Decides destination, action and conflict for one file. `claimed` holds
/// destinations already taken earlier in the same run; they count as existing
/// so a dry run reports what the real run would do.
pub fn plan(
    candidate: &Candidate<'_>,
    cfg: &PlannerConfig,
    fs: &dyn FileSystem,
    claimed: &HashSet<PathBuf>,
) -> Result<DecisionRecord> {
    let dir = destination_dir(&cfg.intake_root, candidate.media_type, candidate.tier);
    let destination = dir.join(candidate.name.as_str());
    if !is_within(&destination, &cfg.intake_root) {
        return Err(SiftError::Planning {
            path: candidate.source.to_path_buf(),
            reason: format!(
                "destination {} escapes intake root {}",
                destination.display(),
                cfg.intake_root.display()
            ),
        });
    }

    let mut record = DecisionRecord {
        source: candidate.source.to_path_buf(),
        relative_path: candidate.relative.to_path_buf(),
        media_type: candidate.media_type,
        tier: Some(candidate.tier.id.clone()),
        attributes: Some(candidate.attributes),
        canonical_name: Some(candidate.name.to_string()),
        destination: Some(destination.clone()),
        action: match cfg.mode {
            TransferMode::Copy => Action::Copy,
            TransferMode::Move => Action::Move,
        },
        conflict: Conflict::None,
        outcome: Outcome::Executed,
        performed: false,
        reason: None,
        existing_path: None,
    };

    if let Some(reason) = candidate.skip_reason {
        record.skip(reason.code());
        return Ok(record);
    }
    if !fs.exists(candidate.source) {
        record.skip("source_missing");
        return Ok(record);
    }

    let existing = if claimed.contains(&destination) {
        Some(destination.clone())
    } else {
        find_existing_variant(fs, &destination).map_err(|e| SiftError::Io {
            op: "list destination",
            path: dir.clone(),
            source: e,
        })?
    };
    if let Some(existing) = existing {
        match cfg.existing {
            ExistingPolicy::Skip => {
                record.skip("already_present");
                record.conflict = Conflict::SkippedExisting;
            }
            ExistingPolicy::Overwrite if existing == destination => {
                record.conflict = Conflict::Overwritten;
            }
            // A de-duplicated variant is left alone; the canonical name is free.
            ExistingPolicy::Overwrite => {}
        }
        record.existing_path = Some(existing);
    }

    debug!(
        source = %candidate.source.display(),
        destination = %destination.display(),
        action = ?record.action,
        conflict = ?record.conflict,
        "planned"
    );
    Ok(record)
}

/// The destination itself, or a `name (N).ext` variant next to it.
pub fn find_existing_variant(fs: &dyn FileSystem, dst: &Path) -> io::Result<Option<PathBuf>> {
    let Some(parent) = dst.parent() else {
        return Ok(None);
    };
    if !fs.exists(parent) {
        return Ok(None);
    }
    if fs.exists(dst) {
        return Ok(Some(dst.to_path_buf()));
    }
    let stem = dst.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let suffix = dst
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let prefix = format!("{stem} (");
    let closing = format!("){suffix}");

    let mut entries = fs.list_dir(parent)?;
    entries.sort();
    Ok(entries.into_iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
            .and_then(|n| n.strip_suffix(closing.as_str()))
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }))
}

/// Performs the planned transfer unless this is a dry run or a skip.
/// IO failures are recorded on the record rather than returned.
pub fn execute(record: &mut DecisionRecord, dry_run: bool, mkdirs: bool, fs: &dyn FileSystem) {
    if dry_run || record.action == Action::Skip {
        return;
    }
    let Some(destination) = record.destination.clone() else {
        return;
    };

    let result = transfer(&record.source, &destination, record.action, mkdirs, fs);
    match result {
        Ok(()) => {
            record.performed = true;
            record.outcome = Outcome::Executed;
        }
        Err(err) => {
            warn!(source = %record.source.display(), error = %err, "transfer failed");
            record.outcome = Outcome::Failed;
            record.reason = Some(err.to_string());
        }
    }
}

fn transfer(
    source: &Path,
    destination: &Path,
    action: Action,
    mkdirs: bool,
    fs: &dyn FileSystem,
) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if mkdirs {
            fs.create_dir_all(parent).map_err(|e| SiftError::Io {
                op: "create directory",
                path: parent.to_path_buf(),
                source: e,
            })?;
        } else if !fs.exists(parent) {
            return Err(SiftError::Io {
                op: "open destination directory",
                path: parent.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "missing and io.mkdirs is off"),
            });
        }
    }
    let (op, res) = match action {
        Action::Copy => ("copy", fs.copy(source, destination)),
        Action::Move => ("move", fs.move_file(source, destination)),
        Action::Skip => return Ok(()),
    };
    res.map_err(|e| SiftError::Io {
        op,
        path: source.to_path_buf(),
        source: e,
    })
}

/// `None` means the flat layout: no media-type level.
pub fn infer_media_type(relative: &Path, strategy: MediaTypeStrategy) -> Option<MediaType> {
    match strategy {
        MediaTypeStrategy::Flat => None,
        MediaTypeStrategy::Folder => {
            let head = relative
                .parent()
                .and_then(|p| p.components().next())
                .and_then(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .map(str::to_ascii_lowercase);
            match head.as_deref() {
                Some("tv" | "shows" | "series") => Some(MediaType::Tv),
                _ => Some(MediaType::Movies),
            }
        }
        MediaTypeStrategy::Sxe => {
            let name = relative
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if naming::has_episode_marker(name) {
                Some(MediaType::Tv)
            } else {
                Some(MediaType::Movies)
            }
        }
    }
}

/// Every folder a run could create, in rule order.
pub fn planned_folders(
    intake_root: &Path,
    table: &RuleTable,
    strategy: MediaTypeStrategy,
) -> Vec<PathBuf> {
    let media_types: &[Option<MediaType>] = match strategy {
        MediaTypeStrategy::Flat => &[None],
        _ => &[Some(MediaType::Movies), Some(MediaType::Tv)],
    };
    media_types
        .iter()
        .flat_map(|mt| {
            table
                .enabled()
                .map(move |rule| destination_dir(intake_root, *mt, rule))
        })
        .collect()
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_within(path: &Path, root: &Path) -> bool {
    let root = normalize_lexically(root);
    let path = normalize_lexically(path);
    path != root && path.starts_with(&root)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::FileSystem;
    use std::collections::BTreeSet;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// In-memory tree of files and directories.
    #[derive(Debug, Default)]
    pub struct MemoryFs {
        pub files: Mutex<BTreeSet<PathBuf>>,
        pub dirs: Mutex<BTreeSet<PathBuf>>,
        pub fail_copies: bool,
    }

    impl MemoryFs {
        pub fn with_files(paths: &[&str]) -> Self {
            let fs = Self::default();
            for p in paths {
                fs.add_file(Path::new(p));
            }
            fs
        }

        pub fn add_file(&self, path: &Path) {
            if let Some(parent) = path.parent() {
                self.add_dir(parent);
            }
            self.files.lock().unwrap().insert(path.to_path_buf());
        }

        pub fn add_dir(&self, dir: &Path) {
            let mut dirs = self.dirs.lock().unwrap();
            for ancestor in dir.ancestors() {
                dirs.insert(ancestor.to_path_buf());
            }
        }

        pub fn has_file(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains(Path::new(path))
        }
    }

    impl FileSystem for MemoryFs {
        fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains(path) || self.dirs.lock().unwrap().contains(path)
        }

        fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.parent() == Some(dir))
                .cloned()
                .collect())
        }

        fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
            self.add_dir(dir);
            Ok(())
        }

        fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            if self.fail_copies {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            if !self.files.lock().unwrap().contains(from) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no source"));
            }
            self.add_file(to);
            Ok(())
        }

        fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.copy(from, to)?;
            self.files.lock().unwrap().remove(from);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::MemoryFs;
    use super::*;
    use crate::models::{AudioCodec, ResolutionClass, VideoCodec};
    use crate::naming::Namer;

    fn cfg(existing: ExistingPolicy, mode: TransferMode) -> PlannerConfig {
        PlannerConfig {
            intake_root: PathBuf::from("/intake"),
            mode,
            existing,
        }
    }

    fn candidate<'a>(tier: &'a TierRule, source: &'a Path) -> Candidate<'a> {
        Candidate {
            source,
            relative: Path::new("movie.mkv"),
            media_type: Some(MediaType::Movies),
            tier,
            attributes: NormalizedAttributes {
                resolution_class: ResolutionClass::Uhd2160,
                is_hdr: true,
                video_codec: VideoCodec::Hevc,
                audio_codec: AudioCodec::Ddp,
                audio_channels: 6,
                ..NormalizedAttributes::UNKNOWN
            },
            name: Namer::default().synthesize(
                "Movie 2020",
                "mkv",
                tier,
                &NormalizedAttributes::UNKNOWN,
            ),
            skip_reason: None,
        }
    }

    fn t1() -> TierRule {
        RuleTable::defaults().get("T1").cloned().unwrap()
    }

    #[test]
    fn plans_copy_into_tier_folder() {
        let fs = MemoryFs::with_files(&["/in/movie.mkv"]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.action, Action::Copy);
        assert_eq!(rec.conflict, Conflict::None);
        assert_eq!(
            rec.destination.as_deref(),
            Some(Path::new("/intake/movies/T1_reference/Movie (2020) [T1].mkv"))
        );
        assert!(!rec.performed);
    }

    #[test]
    fn existing_destination_is_skipped() {
        let fs = MemoryFs::with_files(&[
            "/in/movie.mkv",
            "/intake/movies/T1_reference/Movie (2020) [T1].mkv",
        ]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Move), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.action, Action::Skip);
        assert_eq!(rec.conflict, Conflict::SkippedExisting);
        assert_eq!(rec.outcome, Outcome::Skipped);
        assert!(rec.existing_path.is_some());
    }

    #[test]
    fn deduplicated_variant_counts_as_existing() {
        let fs = MemoryFs::with_files(&[
            "/in/movie.mkv",
            "/intake/movies/T1_reference/Movie (2020) [T1] (2).mkv",
        ]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.conflict, Conflict::SkippedExisting);
        assert_eq!(
            rec.existing_path.as_deref(),
            Some(Path::new(
                "/intake/movies/T1_reference/Movie (2020) [T1] (2).mkv"
            ))
        );
    }

    #[test]
    fn overwrite_policy_keeps_action() {
        let fs = MemoryFs::with_files(&[
            "/in/movie.mkv",
            "/intake/movies/T1_reference/Movie (2020) [T1].mkv",
        ]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let mut rec = plan(&c, &cfg(ExistingPolicy::Overwrite, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.action, Action::Copy);
        assert_eq!(rec.conflict, Conflict::Overwritten);
        execute(&mut rec, false, true, &fs);
        assert!(rec.performed);
        assert_eq!(rec.outcome, Outcome::Executed);
    }

    #[test]
    fn missing_source_is_skipped() {
        let fs = MemoryFs::default();
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/gone.mkv"));
        let rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.action, Action::Skip);
        assert_eq!(rec.reason.as_deref(), Some("source_missing"));
    }

    #[test]
    fn escaping_folder_is_a_planning_error() {
        let fs = MemoryFs::with_files(&["/in/movie.mkv"]);
        let mut tier = t1();
        tier.folder = "../../etc".into();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let err = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap_err();
        assert!(matches!(err, SiftError::Planning { .. }));
    }

    #[test]
    fn dry_run_differs_only_in_performed() {
        let fs = MemoryFs::with_files(&["/in/movie.mkv"]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let planner = cfg(ExistingPolicy::Skip, TransferMode::Move);

        let mut dry = plan(&c, &planner, &fs, &HashSet::new()).unwrap();
        execute(&mut dry, true, true, &fs);
        assert!(fs.has_file("/in/movie.mkv"));
        assert!(!dry.performed);

        let mut wet = plan(&c, &planner, &fs, &HashSet::new()).unwrap();
        execute(&mut wet, false, true, &fs);
        assert!(wet.performed);
        assert!(!fs.has_file("/in/movie.mkv"));
        assert!(fs.has_file("/intake/movies/T1_reference/Movie (2020) [T1].mkv"));

        wet.performed = false;
        assert_eq!(dry, wet);
    }

    #[test]
    fn io_failure_marks_record_failed() {
        let fs = MemoryFs {
            fail_copies: true,
            ..MemoryFs::with_files(&["/in/movie.mkv"])
        };
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let mut rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        execute(&mut rec, false, true, &fs);
        assert_eq!(rec.outcome, Outcome::Failed);
        assert!(!rec.performed);
        assert!(rec.reason.unwrap().contains("read-only"));
    }

    #[test]
    fn missing_parent_without_mkdirs_fails() {
        let fs = MemoryFs::with_files(&["/in/movie.mkv"]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/movie.mkv"));
        let mut rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        execute(&mut rec, false, false, &fs);
        assert_eq!(rec.outcome, Outcome::Failed);
    }

    #[test]
    fn media_type_strategies() {
        let rel = Path::new("TV/Show/Show.S01E02.mkv");
        assert_eq!(infer_media_type(rel, MediaTypeStrategy::Folder), Some(MediaType::Tv));
        assert_eq!(
            infer_media_type(Path::new("tv.mkv"), MediaTypeStrategy::Folder),
            Some(MediaType::Movies)
        );
        assert_eq!(
            infer_media_type(Path::new("x/Show_S01E02.mkv"), MediaTypeStrategy::Sxe),
            Some(MediaType::Tv)
        );
        assert_eq!(
            infer_media_type(Path::new("Heat 1995.mkv"), MediaTypeStrategy::Sxe),
            Some(MediaType::Movies)
        );
        assert_eq!(infer_media_type(rel, MediaTypeStrategy::Flat), None);
    }

    #[test]
    fn sample_reason_is_a_routed_skip() {
        let fs = MemoryFs::with_files(&["/in/movie.mkv"]);
        let tier = t1();
        let mut c = candidate(&tier, Path::new("/in/movie.mkv"));
        c.skip_reason = Some(SampleReason::SampleTooShort);
        let rec = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(rec.action, Action::Skip);
        assert_eq!(rec.outcome, Outcome::Skipped);
        assert_eq!(rec.reason.as_deref(), Some("sample_too_short"));
        assert!(rec.destination.is_some());
    }

    #[test]
    fn claimed_destination_counts_as_existing() {
        let fs = MemoryFs::with_files(&["/in/b/movie.mkv"]);
        let tier = t1();
        let c = candidate(&tier, Path::new("/in/b/movie.mkv"));
        let taken = PathBuf::from("/intake/movies/T1_reference/Movie (2020) [T1].mkv");
        let claimed: HashSet<PathBuf> = [taken.clone()].into_iter().collect();

        let skip = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &claimed).unwrap();
        assert_eq!(skip.action, Action::Skip);
        assert_eq!(skip.conflict, Conflict::SkippedExisting);
        assert_eq!(skip.reason.as_deref(), Some("already_present"));
        assert_eq!(skip.existing_path.as_deref(), Some(taken.as_path()));

        let over = plan(&c, &cfg(ExistingPolicy::Overwrite, TransferMode::Copy), &fs, &claimed).unwrap();
        assert_eq!(over.action, Action::Copy);
        assert_eq!(over.conflict, Conflict::Overwritten);

        let free = plan(&c, &cfg(ExistingPolicy::Skip, TransferMode::Copy), &fs, &HashSet::new()).unwrap();
        assert_eq!(free.conflict, Conflict::None);
    }

    #[test]
    fn folders_cover_media_types_and_tiers() {
        let table = RuleTable::defaults();
        let folders = planned_folders(Path::new("/intake"), &table, MediaTypeStrategy::Folder);
        assert_eq!(folders.len(), 10);
        assert!(folders.contains(&PathBuf::from("/intake/tv/T5_incompatible")));
        let flat = planned_folders(Path::new("/intake"), &table, MediaTypeStrategy::Flat);
        assert_eq!(flat[0], PathBuf::from("/intake/T5_incompatible"));
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert!(!is_within(Path::new("/intake/../etc/x"), Path::new("/intake")));
        assert!(is_within(Path::new("/intake/t/x"), Path::new("/intake")));
    }
}
