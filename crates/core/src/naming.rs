use crate::config::{FlagsConfig, NamingConfig};
use crate::models::{AudioCodec, NormalizedAttributes, ResolutionClass, VideoCodec};
use crate::rules::{RuleTable, TierRule};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

static TRAILING_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\[([^\[\]]*)\]\s*$").expect("trailing block regex should compile")
});
static TAG_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:SD|720p|1080p|2160p|HDR|H264|HEVC|AV1|(?:AAC|DD|DDP|TRUEHD|DTSHD|DTS)(?:\d\.\d)?|\d\.\d)$",
    )
    .expect("tag token regex should compile")
});
static LAYOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d\.\d$").expect("layout regex should compile"));
static SXE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s*-?\s*\bS(\d{1,2})\s?E(\d{1,3})\b")
        .expect("season/episode regex should compile")
});
static YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\()?\b((?:19|20)\d{2})\b(\))?").expect("year regex should compile")
});
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex should compile"));

const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const HFR: &str = "HFR";

/// Destination file name for a classified file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for CanonicalName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// What the stem says about the title, before any tags are added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStem {
    Movie { title: String, year: Option<u16> },
    Episode { show: String, season: u32, episode: u32 },
}

/// Builds canonical names. Holds the display maps, flag settings and every
/// token an earlier run may have put into a tag block.
#[derive(Debug, Clone)]
pub struct Namer {
    naming: NamingConfig,
    flags: FlagsConfig,
    vocabulary: BTreeSet<String>,
}

impl Default for Namer {
    fn default() -> Self {
        Self::new(
            &NamingConfig::default(),
            &FlagsConfig::default(),
            &RuleTable::defaults(),
        )
    }
}

impl Namer {
    pub fn new(naming: &NamingConfig, flags: &FlagsConfig, table: &RuleTable) -> Self {
        let mut vocabulary: BTreeSet<String> = table
            .rules()
            .iter()
            .flat_map(|r| r.flags.iter().cloned())
            .collect();
        vocabulary.insert(HFR.to_string());
        vocabulary.insert(flags.low_bitrate_flag.clone());
        vocabulary.extend(naming.vcodec_map.values().cloned());
        Self {
            naming: naming.clone(),
            flags: flags.clone(),
            vocabulary,
        }
    }

    /// Tier flags minus judgements, then the content-derived flags.
    pub fn flags_for(&self, tier: &TierRule, attrs: &NormalizedAttributes) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |flag: &str| {
            if !out.iter().any(|f| f == flag) {
                out.push(flag.to_string());
            }
        };
        for flag in &tier.flags {
            if !self.flags.judgement.iter().any(|j| j == flag) {
                push(flag);
            }
        }
        if self.flags.enable_hfr
            && attrs
                .frame_rate
                .is_some_and(|fps| fps > self.flags.hfr_fps_threshold)
        {
            push(HFR);
        }
        if self.flags.enable_low_bitrate {
            let threshold = lookup(
                &self.flags.low_bitrate_thresholds,
                attrs.resolution_class.label(),
            );
            if let (Some(&min), Some(bps)) = (threshold, attrs.bit_rate) {
                if bps < min {
                    push(&self.flags.low_bitrate_flag);
                }
            }
        }
        out
    }

    /// `[T1 2160p HDR HEVC DDP5.1]` with unknown tokens omitted and flags appended.
    pub fn tag_block(&self, tier: &TierRule, attrs: &NormalizedAttributes) -> String {
        let mut tokens = vec![tier.id.clone()];
        if attrs.resolution_class != ResolutionClass::Unknown {
            tokens.push(attrs.resolution_class.label().to_string());
        }
        if attrs.is_hdr {
            tokens.push("HDR".to_string());
        }
        if !matches!(attrs.video_codec, VideoCodec::Other | VideoCodec::Unknown) {
            let label = attrs.video_codec.label();
            tokens.push(display(&self.naming.vcodec_map, label).to_string());
        }
        let codec = match attrs.audio_codec {
            AudioCodec::Other | AudioCodec::Unknown => "",
            known => display(&self.naming.acodec_map, known.label()),
        };
        let audio = format!(
            "{codec}{}",
            audio_layout(attrs.audio_channels).unwrap_or_default()
        );
        if !audio.is_empty() {
            tokens.push(audio);
        }
        tokens.extend(self.flags_for(tier, attrs));
        format!("[{}]", tokens.join(" "))
    }

    fn is_tag(&self, token: &str) -> bool {
        TAG_TOKEN.is_match(token)
            || self.vocabulary.contains(token)
            || self.naming.acodec_map.values().any(|tag| {
                token
                    .strip_prefix(tag.as_str())
                    .is_some_and(|rest| rest.is_empty() || LAYOUT.is_match(rest))
            })
    }

    /// Removes a trailing `[TIER ...]` block this synthesizer produced earlier.
    /// Other bracketed groups (release tags) are kept.
    pub fn strip_canonical_block<'a>(&self, stem: &'a str, tier_id: &str) -> &'a str {
        let Some(m) = TRAILING_BLOCK.captures(stem) else {
            return stem;
        };
        let (Some(whole), Some(inner)) = (m.get(0), m.get(1)) else {
            return stem;
        };
        let mut tokens = inner.as_str().split_whitespace();
        let Some(first) = tokens.next() else {
            return stem;
        };
        let rest: Vec<&str> = tokens.collect();
        let all_tags = rest.iter().all(|t| self.is_tag(t));
        let tier_like = !self.is_tag(first)
            && first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let canonical = all_tags && (first == tier_id || (!rest.is_empty() && tier_like));
        if canonical {
            &stem[..whole.start()]
        } else {
            stem
        }
    }

    pub fn parse_stem(&self, stem: &str, tier_id: &str) -> ParsedStem {
        let stem = self.strip_canonical_block(stem, tier_id);
        let cleaned = clean_title(&stem.replace(['.', '_'], " "));

        if let Some(caps) = SXE.captures(&cleaned) {
            let show = caps.get(1).map_or("", |m| m.as_str());
            let season = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
            if let (Some(season), Some(episode)) = (season, episode) {
                return ParsedStem::Episode {
                    show: clean_title(show),
                    season,
                    episode,
                };
            }
        }

        // A parenthesized year wins; otherwise the first bare year that has a title before it.
        let years: Vec<_> = YEAR
            .captures_iter(&cleaned)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let year = c.get(2)?.as_str().parse::<u16>().ok()?;
                let parens = c.get(1).is_some() && c.get(3).is_some();
                let title = clean_title(&cleaned[..whole.start()]);
                (!title.is_empty()).then_some((title, year, parens))
            })
            .collect();
        let pick = years
            .iter()
            .rev()
            .find(|(_, _, parens)| *parens)
            .or_else(|| years.first());

        match pick {
            Some((title, year, _)) => ParsedStem::Movie {
                title: title.clone(),
                year: Some(*year),
            },
            None => ParsedStem::Movie {
                title: cleaned,
                year: None,
            },
        }
    }

    /// Builds the canonical file name. Pure; never touches the filesystem.
    pub fn synthesize(
        &self,
        original_stem: &str,
        extension: &str,
        tier: &TierRule,
        attrs: &NormalizedAttributes,
    ) -> CanonicalName {
        let block = self.tag_block(tier, attrs);
        let ext = sanitize(extension.trim_start_matches('.'), true);
        let ext_part = if ext.is_empty() {
            String::new()
        } else {
            format!(".{ext}")
        };
        let strict = self.naming.sanitize;

        let (head, tail) = match self.parse_stem(original_stem, &tier.id) {
            ParsedStem::Movie { title, year } => {
                let tail = match year {
                    Some(y) => format!("({y}) {block}{ext_part}"),
                    None => format!("{block}{ext_part}"),
                };
                (sanitize(&title, strict), tail)
            }
            ParsedStem::Episode {
                show,
                season,
                episode,
            } => (
                sanitize(&show, strict),
                format!("- S{season:02}E{episode:02} {block}{ext_part}"),
            ),
        };

        // Only the title gives way to the length limit. The cut may leave
        // separators behind, so it is tidied the same way a re-parse would.
        let budget = self.naming.max_filename_len.saturating_sub(tail.len() + 1);
        let head = if head.len() > budget {
            tidy(truncate_bytes(&head, budget))
        } else {
            head
        };

        let name = if head.is_empty() {
            tail.trim_start_matches("- ").to_string()
        } else {
            format!("{head} {tail}")
        };
        CanonicalName(name)
    }
}

pub fn has_episode_marker(stem: &str) -> bool {
    SXE.is_match(&stem.replace(['.', '_'], " "))
}

fn lookup<'a, V>(map: &'a BTreeMap<String, V>, label: &str) -> Option<&'a V> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(label))
        .map(|(_, v)| v)
}

fn display<'a>(map: &'a BTreeMap<String, String>, label: &'a str) -> &'a str {
    lookup(map, label).map_or(label, String::as_str)
}

fn clean_title(s: &str) -> String {
    WHITESPACE
        .replace_all(s.trim(), " ")
        .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '(' || c == '[')
        .to_string()
}

/// `clean_title` and trailing-dot trimming until neither changes anything.
fn tidy(s: &str) -> String {
    let mut current = clean_title(s);
    loop {
        let next = clean_title(current.trim_end_matches('.'));
        if next == current {
            return current;
        }
        current = next;
    }
}

fn audio_layout(channels: u32) -> Option<String> {
    match channels {
        0 => None,
        c if c >= 8 => Some("7.1".into()),
        6 | 7 => Some("5.1".into()),
        c => Some(format!("{c}.0")),
    }
}

fn sanitize(s: &str, strict: bool) -> String {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| {
            if strict {
                !RESERVED.contains(c)
            } else {
                *c != '/' && *c != '\\'
            }
        })
        .collect();
    tidy(&cleaned)
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
