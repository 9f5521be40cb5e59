//! Media probing abstractions: the raw stream model and the prober trait.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub mod ffprobe;
pub mod fixture;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe binary not found: {0}")]
    NotFound(String),
    #[error("failed to spawn probe: {0}")]
    Spawn(String),
    #[error("probe exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("probe timed out after {0}s")]
    Timeout(u64),
    #[error("probe output was not valid JSON: {0}")]
    Parse(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl From<&str> for StreamKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            "subtitle" => StreamKind::Subtitle,
            _ => StreamKind::Other,
        }
    }
}

/// One stream as reported by the probe tool. Everything but the kind and the
/// declaration index may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: u32,
    pub kind: StreamKind,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub pix_fmt: Option<String>,
    #[serde(default)]
    pub color_transfer: Option<String>,
    #[serde(default)]
    pub color_primaries: Option<String>,
    #[serde(default)]
    pub side_data: Vec<String>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub channel_layout: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<u64>,
    /// Frames per second, video only.
    #[serde(default)]
    pub frame_rate: Option<f64>,
}

impl StreamDescriptor {
    pub fn new(index: u32, kind: StreamKind) -> Self {
        Self {
            index,
            kind,
            codec: None,
            profile: None,
            width: None,
            height: None,
            pix_fmt: None,
            color_transfer: None,
            color_primaries: None,
            side_data: Vec::new(),
            channels: None,
            channel_layout: None,
            bit_rate: None,
            frame_rate: None,
        }
    }

    pub fn video(index: u32, codec: &str, width: u32, height: u32) -> Self {
        Self {
            codec: Some(codec.to_string()),
            width: Some(width),
            height: Some(height),
            ..Self::new(index, StreamKind::Video)
        }
    }

    pub fn audio(index: u32, codec: &str, channels: u32) -> Self {
        Self {
            codec: Some(codec.to_string()),
            channels: Some(channels),
            ..Self::new(index, StreamKind::Audio)
        }
    }

    pub fn with_transfer(mut self, transfer: &str) -> Self {
        self.color_transfer = Some(transfer.to_string());
        self
    }

    pub fn with_primaries(mut self, primaries: &str) -> Self {
        self.color_primaries = Some(primaries.to_string());
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }
}

/// Structured result of probing one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProbe {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub bit_rate: Option<u64>,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
}

impl RawProbe {
    pub fn with_streams(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            streams,
            ..Self::default()
        }
    }

    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn count_of(&self, kind: StreamKind) -> usize {
        self.streams_of(kind).count()
    }
}

#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<RawProbe, ProbeError>;
}
