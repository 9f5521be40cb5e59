use crate::error::{Result, SiftError};
use crate::models::{AudioCodec, NormalizedAttributes, ResolutionClass, VideoCodec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

static TIER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("tier id regex should compile"));
static NAME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+-]+$").expect("name token regex should compile"));

/// Whether `s` can stand as one token of a canonical tag block.
pub fn is_name_token(s: &str) -> bool {
    NAME_TOKEN.is_match(s)
}

/// Set constraint over one attribute. Both lists empty means wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(
    deny_unknown_fields,
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct Constraint<T> {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub none_of: Vec<T>,
}

impl<T> Default for Constraint<T> {
    fn default() -> Self {
        Self {
            any_of: Vec::new(),
            none_of: Vec::new(),
        }
    }
}

impl<T: PartialEq> Constraint<T> {
    pub fn any_of(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            any_of: values.into_iter().collect(),
            none_of: Vec::new(),
        }
    }

    pub fn admits(&self, value: &T) -> bool {
        (self.any_of.is_empty() || self.any_of.contains(value)) && !self.none_of.contains(value)
    }

    fn is_wildcard(&self) -> bool {
        self.any_of.is_empty() && self.none_of.is_empty()
    }
}

/// Conjunction of attribute constraints. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_audio_channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_audio_channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Constraint<ResolutionClass>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<Constraint<VideoCodec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<Constraint<AudioCodec>>,
}

impl Predicate {
    pub fn is_catch_all(&self) -> bool {
        self.hdr.is_none()
            && self.min_audio_channels.is_none()
            && self.max_audio_channels.is_none()
            && self.resolution.as_ref().map_or(true, Constraint::is_wildcard)
            && self.video_codec.as_ref().map_or(true, Constraint::is_wildcard)
            && self.audio_codec.as_ref().map_or(true, Constraint::is_wildcard)
    }
}

pub fn matches(when: &Predicate, attrs: &NormalizedAttributes) -> bool {
    when.hdr.map_or(true, |hdr| hdr == attrs.is_hdr)
        && when
            .min_audio_channels
            .map_or(true, |min| attrs.audio_channels >= min)
        && when
            .max_audio_channels
            .map_or(true, |max| attrs.audio_channels <= max)
        && when
            .resolution
            .as_ref()
            .map_or(true, |c| c.admits(&attrs.resolution_class))
        && when
            .video_codec
            .as_ref()
            .map_or(true, |c| c.admits(&attrs.video_codec))
        && when
            .audio_codec
            .as_ref()
            .map_or(true, |c| c.admits(&attrs.audio_codec))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierRule {
    pub id: String,
    pub label: String,
    pub folder: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Extra tokens for the name's tag block; judgement flags are filtered out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default)]
    pub when: Predicate,
}

fn enabled_by_default() -> bool {
    true
}

impl TierRule {
    pub fn new(id: &str, label: &str, folder: &str, when: Predicate) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            folder: folder.to_string(),
            enabled: true,
            flags: Vec::new(),
            when,
        }
    }

    pub fn with_flags(mut self, flags: &[&str]) -> Self {
        self.flags = flags.iter().map(|f| f.to_string()).collect();
        self
    }
}

pub fn default_rules() -> Vec<TierRule> {
    use AudioCodec::{DtsHd, TrueHd};
    use ResolutionClass::{Hd1080, Hd720, Uhd2160};
    use VideoCodec::{Av1, Hevc, H264};

    vec![
        TierRule::new(
            "T5",
            "Incompatible audio",
            "T5_incompatible",
            Predicate {
                audio_codec: Some(Constraint::any_of([TrueHd, DtsHd])),
                ..Predicate::default()
            },
        )
        .with_flags(&["INCOMPATIBLE"]),
        TierRule::new(
            "T1",
            "Reference",
            "T1_reference",
            Predicate {
                resolution: Some(Constraint::any_of([Uhd2160])),
                hdr: Some(true),
                video_codec: Some(Constraint::any_of([Hevc, Av1])),
                ..Predicate::default()
            },
        ),
        TierRule::new(
            "T2",
            "Keep",
            "T2_keep",
            Predicate {
                resolution: Some(Constraint::any_of([Uhd2160, Hd1080])),
                video_codec: Some(Constraint::any_of([Hevc, Av1, H264])),
                ..Predicate::default()
            },
        )
        .with_flags(&["KEEP"]),
        TierRule::new(
            "T3",
            "Acceptable",
            "T3_acceptable",
            Predicate {
                resolution: Some(Constraint::any_of([Hd1080, Hd720])),
                ..Predicate::default()
            },
        )
        .with_flags(&["OK"]),
        TierRule::new("T4", "Replace", "T4_replace", Predicate::default()).with_flags(&["REPLACE"]),
    ]
}

/// Validated, ordered rule list whose last enabled rule is a catch-all.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<TierRule>,
    terminal: usize,
}

impl RuleTable {
    pub fn new(rules: Vec<TierRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(SiftError::config("tier rule with empty id"));
            }
            // Ids end up inside file names.
            if !TIER_ID.is_match(&rule.id) {
                return Err(SiftError::config(format!(
                    "tier id {:?} may only contain letters, digits, '_' and '-'",
                    rule.id
                )));
            }
            if let Some(flag) = rule.flags.iter().find(|f| !is_name_token(f)) {
                return Err(SiftError::config(format!(
                    "tier {} flag {flag:?} may only contain letters, digits, '_', '+' and '-'",
                    rule.id
                )));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(SiftError::config(format!("duplicate tier id {}", rule.id)));
            }
            check_folder(rule)?;
        }
        let terminal = rules
            .iter()
            .rposition(|r| r.enabled)
            .ok_or_else(|| SiftError::config("tier table has no enabled rules"))?;
        if !rules[terminal].when.is_catch_all() {
            return Err(SiftError::config(format!(
                "last enabled tier {} must be a catch-all (empty `when`)",
                rules[terminal].id
            )));
        }
        Ok(Self { rules, terminal })
    }

    pub fn defaults() -> Self {
        let rules = default_rules();
        let terminal = rules.len() - 1;
        Self { rules, terminal }
    }

    pub fn rules(&self) -> &[TierRule] {
        &self.rules
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TierRule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn get(&self, id: &str) -> Option<&TierRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// The catch-all that ends evaluation.
    pub fn terminal(&self) -> &TierRule {
        &self.rules[self.terminal]
    }
}

fn check_folder(rule: &TierRule) -> Result<()> {
    let folder = Path::new(&rule.folder);
    if rule.folder.trim().is_empty() {
        return Err(SiftError::config(format!("tier {} has an empty folder", rule.id)));
    }
    let escapes = folder.is_absolute()
        || folder
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SiftError::config(format!(
            "tier {} folder {:?} points outside the intake root",
            rule.id, rule.folder
        )));
    }
    Ok(())
}

/// Reads one rule per `*.toml` file, ordered by file name.
pub fn load_rules_from_dir(dir: &Path) -> Result<Vec<TierRule>> {
    let read_err = |e: std::io::Error| SiftError::Io {
        op: "read rules",
        path: dir.to_path_buf(),
        source: e,
    };
    if !dir.is_dir() {
        return Err(SiftError::config(format!(
            "rules.path is not a directory: {}",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("toml") {
            files.push(path);
        }
    }
    files.sort();

    let mut rules = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(&path).map_err(|e| SiftError::Io {
            op: "read rule",
            path: path.clone(),
            source: e,
        })?;
        let rule: TierRule = toml::from_str(&content)
            .map_err(|e| SiftError::config(format!("{}: {e}", path.display())))?;
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let table = RuleTable::new(default_rules()).unwrap();
        assert_eq!(table.terminal().id, "T4");
        assert_eq!(table.rules().len(), 5);
        assert_eq!(table.get("T1").map(|r| r.folder.as_str()), Some("T1_reference"));
    }

    #[test]
    fn constraint_any_and_none() {
        let c = Constraint {
            any_of: vec![VideoCodec::Hevc, VideoCodec::H264],
            none_of: vec![VideoCodec::H264],
        };
        assert!(c.admits(&VideoCodec::Hevc));
        assert!(!c.admits(&VideoCodec::H264));
        assert!(!c.admits(&VideoCodec::Av1));
        assert!(Constraint::<VideoCodec>::default().admits(&VideoCodec::Unknown));
    }

    #[test]
    fn channel_bounds() {
        let when = Predicate {
            min_audio_channels: Some(6),
            max_audio_channels: Some(7),
            ..Predicate::default()
        };
        let mut attrs = NormalizedAttributes::UNKNOWN;
        attrs.audio_channels = 6;
        assert!(matches(&when, &attrs));
        attrs.audio_channels = 8;
        assert!(!matches(&when, &attrs));
        attrs.audio_channels = 2;
        assert!(!matches(&when, &attrs));
    }

    #[test]
    fn rejects_missing_catch_all() {
        let mut rules = default_rules();
        rules.pop();
        let err = RuleTable::new(rules).unwrap_err();
        assert!(err.to_string().contains("catch-all"));
    }

    #[test]
    fn disabled_trailing_rule_exposes_missing_catch_all() {
        let mut rules = default_rules();
        if let Some(last) = rules.last_mut() {
            last.enabled = false;
        }
        assert!(RuleTable::new(rules).is_err());
    }

    #[test]
    fn rejects_duplicates_and_bad_folders() {
        let mut rules = default_rules();
        rules[1].id = "T5".into();
        assert!(RuleTable::new(rules).unwrap_err().to_string().contains("duplicate"));

        for folder in ["", "/abs", "../up", "a/../../b"] {
            let mut rules = default_rules();
            rules[0].folder = folder.into();
            assert!(RuleTable::new(rules).is_err(), "folder {folder:?} accepted");
        }

        let mut rules = default_rules();
        rules[0].folder = "nested/T5".into();
        assert!(RuleTable::new(rules).is_ok());
    }

    #[test]
    fn rejects_ids_and_flags_unfit_for_file_names() {
        for id in ["A/B", "T 1", "T1]", "a\\b", "T.1"] {
            let mut rules = default_rules();
            rules[0].id = id.into();
            let err = RuleTable::new(rules).unwrap_err();
            assert!(matches!(err, SiftError::Config(_)), "id {id:?} accepted");
        }
        let mut rules = default_rules();
        rules[0].id = "Tier_5-b".into();
        assert!(RuleTable::new(rules).is_ok());

        let mut rules = default_rules();
        rules[0].flags = vec!["NO GOOD".into()];
        assert!(RuleTable::new(rules).is_err());
    }

    #[test]
    fn flags_parse_from_toml() {
        let rule: TierRule =
            toml::from_str("id = \"R\"\nlabel = \"R\"\nfolder = \"r\"\nflags = [\"REMUX\"]\n").unwrap();
        assert_eq!(rule.flags, vec!["REMUX".to_string()]);
        assert_eq!(default_rules()[0].flags, vec!["INCOMPATIBLE".to_string()]);
    }

    #[test]
    fn constraint_lists_are_optional() {
        let c: Constraint<VideoCodec> = toml::from_str("none_of = [\"AV1\"]\n").unwrap();
        assert!(c.any_of.is_empty());
        assert!(c.admits(&VideoCodec::Hevc));
        assert!(!c.admits(&VideoCodec::Av1));
        assert_eq!(
            serde_json::to_string(&c).unwrap(),
            r#"{"none_of":["AV1"]}"#
        );
        assert!(toml::from_str::<Constraint<VideoCodec>>("all_of = []\n").is_err());
    }

    #[test]
    fn empty_table_rejected() {
        assert!(RuleTable::new(Vec::new()).is_err());
    }

    #[test]
    fn loads_rules_sorted_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("20-rest.toml"),
            "id = \"REST\"\nlabel = \"Rest\"\nfolder = \"rest\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("10-hdr.toml"),
            r#"
            id = "HDR"
            label = "HDR only"
            folder = "hdr"
            [when]
            hdr = true
            video_codec = { any_of = ["HEVC"], none_of = ["AV1"] }
            "#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let rules = load_rules_from_dir(dir.path()).unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["HDR", "REST"]);
        assert_eq!(rules[0].when.hdr, Some(true));
        assert!(rules[1].enabled);
        assert!(RuleTable::new(rules).is_ok());
    }

    #[test]
    fn typo_in_predicate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.toml"),
            "id = \"X\"\nlabel = \"X\"\nfolder = \"x\"\n[when]\naudio_codecs = { any_of = [\"AAC\"] }\n",
        )
        .unwrap();
        assert!(matches!(
            load_rules_from_dir(dir.path()),
            Err(SiftError::Config(_))
        ));
    }
}
