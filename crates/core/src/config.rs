use crate::error::{Result, SiftError};
use crate::planner::normalize_lexically;
use crate::rules::{self, RuleTable, TierRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub samples: SampleConfig,
    #[serde(default)]
    pub rules: RuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub incoming: PathBuf,
    pub intake_root: PathBuf,
    #[serde(default)]
    pub cache_db: Option<PathBuf>,
}

impl PathsConfig {
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_db
            .clone()
            .unwrap_or_else(|| self.intake_root.join(".sift").join("probe-cache.db"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingPolicy {
    #[default]
    Skip,
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default)]
    pub mode: TransferMode,
    #[serde(default)]
    pub existing: ExistingPolicy,
    #[serde(default = "default_true")]
    pub mkdirs: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub rescan: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            existing: ExistingPolicy::Skip,
            mkdirs: true,
            dry_run: false,
            rescan: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyMode {
    /// size + mtime
    #[default]
    Stat,
    /// size + mtime + blake3 of the full file
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_bin")]
    pub bin: String,
    #[serde(default = "default_probe_args")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cache_key: CacheKeyMode,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            bin: default_probe_bin(),
            args: default_probe_args(),
            timeout_secs: default_timeout_secs(),
            cache_key: CacheKeyMode::Stat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude: default_excludes(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTypeStrategy {
    /// First path component decides (`tv/`, `shows/`, `series/` → tv).
    #[default]
    Folder,
    /// An `SxxEyy` marker in the file name decides.
    Sxe,
    /// No media-type level under the intake root.
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub media_type_strategy: MediaTypeStrategy,
    #[serde(default = "default_4k_width")]
    pub horizontal_4k_threshold: u32,
    #[serde(default = "default_uhd_height")]
    pub uhd_min_height: u32,
    #[serde(default = "default_fhd_height")]
    pub fhd_min_height: u32,
    #[serde(default = "default_hd_height")]
    pub hd_min_height: u32,
    #[serde(default)]
    pub extra_hdr_transfers: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            media_type_strategy: MediaTypeStrategy::Folder,
            horizontal_4k_threshold: default_4k_width(),
            uhd_min_height: default_uhd_height(),
            fhd_min_height: default_fhd_height(),
            hd_min_height: default_hd_height(),
            extra_hdr_transfers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_true")]
    pub sanitize: bool,
    #[serde(default = "default_max_filename_len")]
    pub max_filename_len: usize,
    /// Display tag per video codec label, e.g. `HEVC = "x265"`. Keys are case-insensitive.
    #[serde(default)]
    pub vcodec_map: BTreeMap<String, String>,
    /// Display tag per audio codec label, e.g. `DDP = "EAC3"`.
    #[serde(default)]
    pub acodec_map: BTreeMap<String, String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            sanitize: true,
            max_filename_len: default_max_filename_len(),
            vcodec_map: BTreeMap::new(),
            acodec_map: BTreeMap::new(),
        }
    }
}

/// Tokens appended to the name's tag block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    #[serde(default)]
    pub enable_hfr: bool,
    /// Strictly above this frame rate a file is flagged `HFR`.
    #[serde(default = "default_hfr_fps")]
    pub hfr_fps_threshold: f64,
    #[serde(default)]
    pub enable_low_bitrate: bool,
    /// Bits per second below which a file is flagged, keyed by resolution label.
    #[serde(default = "default_low_bitrate_thresholds")]
    pub low_bitrate_thresholds: BTreeMap<String, u64>,
    #[serde(default = "default_low_bitrate_flag")]
    pub low_bitrate_flag: String,
    /// Tier flags that never appear in file names.
    #[serde(default = "default_judgement_flags")]
    pub judgement: Vec<String>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            enable_hfr: false,
            hfr_fps_threshold: default_hfr_fps(),
            enable_low_bitrate: false,
            low_bitrate_thresholds: default_low_bitrate_thresholds(),
            low_bitrate_flag: default_low_bitrate_flag(),
            judgement: default_judgement_flags(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_duration")]
    pub min_duration_s: f64,
    #[serde(default = "default_min_video_streams")]
    pub min_video_streams: usize,
    /// Among files whose stems differ only by sample/trailer noise, keep the longest.
    #[serde(default = "default_true")]
    pub prefer_longest_variant: bool,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_duration_s: default_min_duration(),
            min_video_streams: default_min_video_streams(),
            prefer_longest_variant: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Directory of one-rule TOML files, evaluated in file-name order.
    /// Relative paths are taken from the config file's directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub tier: Vec<TierRule>,
}

fn default_true() -> bool {
    true
}
fn default_probe_bin() -> String {
    "ffprobe".to_string()
}
fn default_probe_args() -> Vec<String> {
    probe::ffprobe::DEFAULT_ARGS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_extensions() -> Vec<String> {
    ["mkv", "mp4", "m4v", "avi", "mov", "ts", "m2ts", "webm", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_excludes() -> Vec<String> {
    vec!["**/.sift/**".to_string()]
}
fn default_4k_width() -> u32 {
    3800
}
fn default_uhd_height() -> u32 {
    2000
}
fn default_fhd_height() -> u32 {
    1000
}
fn default_hd_height() -> u32 {
    700
}
fn default_max_filename_len() -> usize {
    200
}
fn default_min_duration() -> f64 {
    300.0
}
fn default_min_video_streams() -> usize {
    1
}
fn default_hfr_fps() -> f64 {
    30.0
}
fn default_low_bitrate_thresholds() -> BTreeMap<String, u64> {
    [("720p", 2_000_000), ("1080p", 4_000_000), ("2160p", 12_000_000)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
fn default_low_bitrate_flag() -> String {
    "LOWBR".to_string()
}
fn default_judgement_flags() -> Vec<String> {
    ["REPLACE_SOON", "REPLACE", "INCOMPATIBLE", "REVIEW", "OK", "KEEP"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Loads the config file (TOML) with `SIFT__SECTION__KEY` environment overrides.
pub fn load(path: Option<&str>) -> Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("SIFT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let mut cfg: AppConfig = settings.build()?.try_deserialize()?;
    if let Some(dir) = path.and_then(|p| Path::new(p).parent()) {
        cfg.rules.path = cfg.rules.path.map(|rules| dir.join(rules));
    }
    Ok(cfg)
}

impl AppConfig {
    /// Minimal config with defaults everywhere except the two required roots.
    pub fn with_roots(incoming: impl Into<PathBuf>, intake_root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                incoming: incoming.into(),
                intake_root: intake_root.into(),
                cache_db: None,
            },
            io: IoConfig::default(),
            probe: ProbeConfig::default(),
            scan: ScanConfig::default(),
            classification: ClassificationConfig::default(),
            naming: NamingConfig::default(),
            flags: FlagsConfig::default(),
            samples: SampleConfig::default(),
            rules: RuleConfig::default(),
        }
    }

    /// Makes relative paths absolute against the current directory.
    pub fn resolve_paths(mut self) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| SiftError::config(format!("cannot read current directory: {e}")))?;
        let abs = |p: &Path| normalize_lexically(&cwd.join(p));
        self.paths.incoming = abs(&self.paths.incoming);
        self.paths.intake_root = abs(&self.paths.intake_root);
        self.paths.cache_db = self.paths.cache_db.as_deref().map(abs);
        self.rules.path = self.rules.path.as_deref().map(abs);
        Ok(self)
    }

    /// The effective rule table: inline rules, then rule files, else defaults.
    pub fn rule_table(&self) -> Result<RuleTable> {
        let mut rules = self.rules.tier.clone();
        if let Some(dir) = &self.rules.path {
            rules.extend(rules::load_rules_from_dir(dir)?);
        }
        if rules.is_empty() {
            return Ok(RuleTable::defaults());
        }
        RuleTable::new(rules)
    }

    /// Fail-fast validation run before any file is touched.
    pub fn validate(&self) -> Result<RuleTable> {
        let incoming = &self.paths.incoming;
        if !incoming.exists() {
            return Err(SiftError::config(format!(
                "paths.incoming does not exist: {}",
                incoming.display()
            )));
        }
        if !incoming.is_dir() {
            return Err(SiftError::config(format!(
                "paths.incoming is not a directory: {}",
                incoming.display()
            )));
        }
        if self.paths.intake_root.as_os_str().is_empty() {
            return Err(SiftError::config("paths.intake_root is empty"));
        }
        let incoming_n = normalize_lexically(incoming);
        let intake_n = normalize_lexically(&self.paths.intake_root);
        if intake_n == incoming_n || intake_n.starts_with(&incoming_n) {
            return Err(SiftError::config(format!(
                "paths.intake_root ({}) must not be inside paths.incoming ({})",
                intake_n.display(),
                incoming_n.display()
            )));
        }
        if self.probe.timeout_secs == 0 {
            return Err(SiftError::config("probe.timeout_secs must be greater than 0"));
        }
        if self.probe.bin.trim().is_empty() {
            return Err(SiftError::config("probe.bin is empty"));
        }
        if self.naming.max_filename_len < 32 {
            return Err(SiftError::config("naming.max_filename_len must be at least 32"));
        }
        let display_tags = self
            .naming
            .vcodec_map
            .iter()
            .map(|(k, v)| (format!("naming.vcodec_map.{k}"), v))
            .chain(
                self.naming
                    .acodec_map
                    .iter()
                    .map(|(k, v)| (format!("naming.acodec_map.{k}"), v)),
            );
        for (key, tag) in display_tags {
            if !rules::is_name_token(tag) {
                return Err(SiftError::config(format!(
                    "{key} = {tag:?} is not a single name token"
                )));
            }
        }
        if !rules::is_name_token(&self.flags.low_bitrate_flag) {
            return Err(SiftError::config(format!(
                "flags.low_bitrate_flag {:?} is not a single name token",
                self.flags.low_bitrate_flag
            )));
        }
        let fps = self.flags.hfr_fps_threshold;
        if fps.is_nan() || fps <= 0.0 {
            return Err(SiftError::config("flags.hfr_fps_threshold must be greater than 0"));
        }
        self.rule_table()
    }
}
