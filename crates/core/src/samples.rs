use crate::config::SampleConfig;
use once_cell::sync::Lazy;
use probe::{RawProbe, StreamKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

static GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("group regex should compile"));
static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:sample|trailer|\d{3,4}p)$").expect("noise regex should compile")
});

/// Why a file is routed but not transferred. Serialized as the stable code
/// that lands in the report's `reason` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleReason {
    NoVideoStream,
    SampleTooShort,
    SampleShorterVariant,
}

impl SampleReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::NoVideoStream => "no_video_stream",
            Self::SampleTooShort => "sample_too_short",
            Self::SampleShorterVariant => "sample_shorter_variant",
        }
    }
}

impl fmt::Display for SampleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One scanned file as sample detection sees it. `probe` is `None` when
/// probing failed.
#[derive(Debug, Clone, Copy)]
pub struct Variant<'a> {
    pub stem: &'a str,
    pub probe: Option<&'a RawProbe>,
}

/// Grouping key for variants of the same title: bracketed groups, resolution
/// tags and sample/trailer words removed, lowercased.
pub fn normalize_stem(stem: &str) -> String {
    let stripped = GROUPS.replace_all(stem, " ");
    stripped
        .split(|c: char| c == '.' || c == '_' || c.is_whitespace())
        .filter(|t| !t.is_empty() && !NOISE.is_match(t))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Checks that need only the file's own probe.
pub fn check(raw: &RawProbe, cfg: &SampleConfig) -> Option<SampleReason> {
    if raw.count_of(StreamKind::Video) < cfg.min_video_streams {
        return Some(SampleReason::NoVideoStream);
    }
    match raw.duration_s {
        Some(d) if d < cfg.min_duration_s => Some(SampleReason::SampleTooShort),
        _ => None,
    }
}

/// Sample verdicts for a whole run, index-aligned with `variants`.
///
/// With `prefer_longest_variant`, files that passed [`check`] are grouped by
/// [`normalize_stem`]; every member but the longest is a shorter variant. Ties
/// keep the earliest file.
pub fn mark_samples(variants: &[Variant<'_>], cfg: &SampleConfig) -> Vec<Option<SampleReason>> {
    if !cfg.enabled {
        return vec![None; variants.len()];
    }
    let mut reasons: Vec<Option<SampleReason>> = variants
        .iter()
        .map(|v| v.probe.and_then(|raw| check(raw, cfg)))
        .collect();
    if !cfg.prefer_longest_variant {
        return reasons;
    }

    let mut groups: HashMap<String, Vec<(usize, f64)>> = HashMap::new();
    for (idx, v) in variants.iter().enumerate() {
        if reasons[idx].is_some() {
            continue;
        }
        let Some(duration) = v.probe.and_then(|raw| raw.duration_s) else {
            continue;
        };
        let key = normalize_stem(v.stem);
        if !key.is_empty() {
            groups.entry(key).or_default().push((idx, duration));
        }
    }
    for (key, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
        let longest = members
            .iter()
            .copied()
            .reduce(|best, next| if next.1 > best.1 { next } else { best })
            .map(|(idx, _)| idx);
        debug!(group = %key, size = members.len(), "shorter variants marked");
        for (idx, _) in members {
            if Some(idx) != longest {
                reasons[idx] = Some(SampleReason::SampleShorterVariant);
            }
        }
    }
    reasons
}
