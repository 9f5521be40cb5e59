use crate::cache::{CacheStats, ProbeCache};
use crate::classifier::{self, RuleTrace};
use crate::config::AppConfig;
use crate::error::{Result, SiftError};
use crate::models::{FileRecord, MediaType, NormalizedAttributes};
use crate::naming::Namer;
use crate::normalizer::Normalizer;
use crate::planner::{self, Action, Candidate, DecisionRecord, FileSystem, Outcome, PlannerConfig};
use crate::report::{ReportAggregator, TransferReport};
use crate::rules::RuleTable;
use crate::samples::{self, SampleReason, Variant};
use crate::scanner::{self, ScanOptions};
use probe::{MediaProber, RawProbe};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub rescan: bool,
    pub limit: Option<usize>,
    /// Replaces `scan.extensions` when non-empty.
    pub only_ext: Vec<String>,
}

pub struct RunOutput {
    pub report: TransferReport,
    pub cache: CacheStats,
}

struct Stages<'a> {
    config: &'a AppConfig,
    table: &'a RuleTable,
    normalizer: Normalizer,
    namer: Namer,
    planner: PlannerConfig,
    fs: &'a dyn FileSystem,
    dry_run: bool,
}

/// One intake run over every file under `paths.incoming`, in relative-path
/// order: probe everything, mark samples across the whole set, then classify,
/// name, plan and transfer file by file.
pub async fn run(
    config: &AppConfig,
    opts: &RunOptions,
    prober: Arc<dyn MediaProber>,
    fs: &dyn FileSystem,
) -> Result<RunOutput> {
    let table = config.validate()?;
    let dry_run = opts.dry_run || config.io.dry_run;
    let rescan = opts.rescan || config.io.rescan;

    info!(
        incoming = %config.paths.incoming.display(),
        intake = %config.paths.intake_root.display(),
        dry_run,
        rescan,
        "Starting scan phase..."
    );
    let extensions = if opts.only_ext.is_empty() {
        &config.scan.extensions
    } else {
        &opts.only_ext
    };
    let scan_opts = ScanOptions::new(
        extensions,
        &config.scan.exclude,
        opts.limit.or(config.scan.limit),
    );
    let files = discover(&config.paths.incoming, scan_opts).await?;
    info!("Scan complete. Discovered {} files.", files.len());

    let mut cache = ProbeCache::open(
        &config.paths.cache_db_path(),
        prober,
        rescan,
        config.probe.cache_key,
    )
    .await?;

    info!("Starting probe phase...");
    let mut probes = Vec::with_capacity(files.len());
    for file in &files {
        match cache.get_or_probe(&file.path).await {
            Err(err) if err.is_fatal() => return Err(err),
            result => probes.push(result),
        }
    }

    let stems: Vec<String> = files.iter().map(|f| split_name(&f.relative).0).collect();
    let sample_reasons = {
        let variants: Vec<Variant<'_>> = stems
            .iter()
            .zip(&probes)
            .map(|(stem, probe)| Variant {
                stem: stem.as_str(),
                probe: probe.as_ref().ok(),
            })
            .collect();
        samples::mark_samples(&variants, &config.samples)
    };

    let stages = Stages {
        config,
        table: &table,
        normalizer: Normalizer::from(&config.classification),
        namer: Namer::new(&config.naming, &config.flags, &table),
        planner: PlannerConfig::from(config),
        fs,
        dry_run,
    };

    info!("Starting classification and transfer phase...");
    let mut agg = ReportAggregator::new();
    let mut claimed = HashSet::new();
    for ((file, probe), reason) in files.iter().zip(probes).zip(sample_reasons) {
        let record = match probe {
            Ok(raw) => stages.process(file, &raw, reason, &mut claimed),
            Err(err) => {
                warn!(path = %file.relative.display(), error = %err, "file failed");
                DecisionRecord::failed(&file.path, &file.relative, err.to_string())
            }
        };
        agg.record(record);
    }

    let report = agg.finish();
    let stats = cache.stats();
    let entries = cache.entries().await?;
    info!(
        total = report.summary.total,
        executed = report.summary.executed,
        skipped = report.summary.skipped,
        failed = report.summary.failed,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        cache_corrupt = stats.corrupt,
        cache_entries = entries,
        "Run complete."
    );
    Ok(RunOutput {
        report,
        cache: stats,
    })
}

impl Stages<'_> {
    fn process(
        &self,
        file: &FileRecord,
        raw: &RawProbe,
        skip_reason: Option<SampleReason>,
        claimed: &mut HashSet<PathBuf>,
    ) -> DecisionRecord {
        let attributes = self.normalizer.normalize(raw);
        let tier = classifier::classify(&attributes, self.table);
        debug!(path = %file.relative.display(), tier = %tier.id, ?attributes, "classified");

        let (stem, ext) = split_name(&file.relative);
        let name = self.namer.synthesize(&stem, &ext, tier, &attributes);
        let candidate = Candidate {
            source: &file.path,
            relative: &file.relative,
            media_type: planner::infer_media_type(
                &file.relative,
                self.config.classification.media_type_strategy,
            ),
            tier,
            attributes,
            name,
            skip_reason,
        };

        let mut record = match planner::plan(&candidate, &self.planner, self.fs, claimed) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %file.relative.display(), error = %err, "planning failed");
                let mut record = DecisionRecord::failed(&file.path, &file.relative, err.to_string());
                record.tier = Some(tier.id.clone());
                record.attributes = Some(attributes);
                record.media_type = candidate.media_type;
                return record;
            }
        };
        planner::execute(&mut record, self.dry_run, self.config.io.mkdirs, self.fs);
        if record.action != Action::Skip && record.outcome == Outcome::Executed {
            if let Some(destination) = &record.destination {
                claimed.insert(destination.clone());
            }
        }
        record
    }
}

async fn discover(root: &Path, opts: ScanOptions) -> Result<Vec<FileRecord>> {
    let root_owned = root.to_path_buf();
    tokio::task::spawn_blocking(move || scanner::discover(&root_owned, &opts))
        .await
        .map_err(|e| SiftError::Io {
            op: "scan",
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?
}

fn split_name(relative: &Path) -> (String, String) {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = relative
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    (stem, ext)
}

/// Everything `sift inspect` shows for a single file.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub path: PathBuf,
    pub probe: RawProbe,
    pub attributes: NormalizedAttributes,
    pub tier: String,
    pub media_type: Option<MediaType>,
    pub canonical_name: String,
    pub destination: PathBuf,
    pub rules: Vec<RuleTrace>,
}

pub async fn inspect(
    config: &AppConfig,
    path: &Path,
    rescan: bool,
    prober: Arc<dyn MediaProber>,
) -> Result<Inspection> {
    let table = config.rule_table()?;
    let mut cache = ProbeCache::open(
        &config.paths.cache_db_path(),
        prober,
        rescan,
        config.probe.cache_key,
    )
    .await?;
    let raw = cache.get_or_probe(path).await?;
    let attributes = Normalizer::from(&config.classification).normalize(&raw);
    let tier = classifier::classify(&attributes, &table);

    let relative = path
        .strip_prefix(&config.paths.incoming)
        .unwrap_or_else(|_| Path::new(path.file_name().unwrap_or(path.as_os_str())));
    let (stem, ext) = split_name(relative);
    let name = Namer::new(&config.naming, &config.flags, &table)
        .synthesize(&stem, &ext, tier, &attributes);
    let media_type =
        planner::infer_media_type(relative, config.classification.media_type_strategy);
    let destination = planner::destination_dir(&config.paths.intake_root, media_type, tier)
        .join(name.as_str());

    Ok(Inspection {
        path: path.to_path_buf(),
        rules: classifier::explain(&attributes, &table),
        probe: raw,
        attributes,
        tier: tier.id.clone(),
        media_type,
        canonical_name: name.into_string(),
        destination,
    })
}

/// Intake folders a run may create, without touching the filesystem.
pub fn folders(config: &AppConfig) -> Result<Vec<PathBuf>> {
    let table = config.rule_table()?;
    Ok(planner::planned_folders(
        &config.paths.intake_root,
        &table,
        config.classification.media_type_strategy,
    ))
}
