use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A file found under the incoming root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionClass {
    #[serde(rename = "SD", alias = "sd")]
    Sd,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "2160p", alias = "4k", alias = "4K")]
    Uhd2160,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ResolutionClass {
    pub const ALL: [ResolutionClass; 5] = [
        ResolutionClass::Sd,
        ResolutionClass::Hd720,
        ResolutionClass::Hd1080,
        ResolutionClass::Uhd2160,
        ResolutionClass::Unknown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ResolutionClass::Sd => "SD",
            ResolutionClass::Hd720 => "720p",
            ResolutionClass::Hd1080 => "1080p",
            ResolutionClass::Uhd2160 => "2160p",
            ResolutionClass::Unknown => "unknown",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    #[serde(rename = "H264", alias = "h264")]
    H264,
    #[serde(rename = "HEVC", alias = "hevc")]
    Hevc,
    #[serde(rename = "AV1", alias = "av1")]
    Av1,
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "unknown")]
    Unknown,
}

impl VideoCodec {
    pub fn label(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::Hevc => "HEVC",
            VideoCodec::Av1 => "AV1",
            VideoCodec::Other => "other",
            VideoCodec::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    #[serde(rename = "AAC", alias = "aac")]
    Aac,
    #[serde(rename = "DD", alias = "dd")]
    Dd,
    #[serde(rename = "DDP", alias = "ddp")]
    Ddp,
    #[serde(rename = "TRUEHD", alias = "truehd")]
    TrueHd,
    #[serde(rename = "DTSHD", alias = "dtshd")]
    DtsHd,
    #[serde(rename = "DTS", alias = "dts")]
    Dts,
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "unknown")]
    Unknown,
}

impl AudioCodec {
    pub fn label(self) -> &'static str {
        match self {
            AudioCodec::Aac => "AAC",
            AudioCodec::Dd => "DD",
            AudioCodec::Ddp => "DDP",
            AudioCodec::TrueHd => "TRUEHD",
            AudioCodec::DtsHd => "DTSHD",
            AudioCodec::Dts => "DTS",
            AudioCodec::Other => "other",
            AudioCodec::Unknown => "unknown",
        }
    }
}

macro_rules! display_via_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_via_label!(ResolutionClass, VideoCodec, AudioCodec);

/// Canonical view of a probe. Every field has an explicit unknown value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAttributes {
    pub resolution_class: ResolutionClass,
    pub is_hdr: bool,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// 0 when unknown.
    pub audio_channels: u32,
    /// Primary video stream, frames per second.
    #[serde(default)]
    pub frame_rate: Option<f64>,
    /// Container-level bits per second.
    #[serde(default)]
    pub bit_rate: Option<u64>,
}

impl NormalizedAttributes {
    pub const UNKNOWN: NormalizedAttributes = NormalizedAttributes {
        resolution_class: ResolutionClass::Unknown,
        is_hdr: false,
        video_codec: VideoCodec::Unknown,
        audio_codec: AudioCodec::Unknown,
        audio_channels: 0,
        frame_rate: None,
        bit_rate: None,
    };
}

impl Default for NormalizedAttributes {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movies,
    Tv,
}

impl MediaType {
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaType::Movies => "movies",
            MediaType::Tv => "tv",
        }
    }
}
