use crate::config::ClassificationConfig;
use crate::models::{AudioCodec, NormalizedAttributes, ResolutionClass, VideoCodec};
use probe::{RawProbe, StreamDescriptor, StreamKind};

const HDR_TRANSFERS: &[&str] = &["smpte2084", "arib-std-b67"];
const HDR_PRIMARIES: &[&str] = &["bt2020"];
const HDR_SIDE_DATA: &[&str] = &[
    "mastering display metadata",
    "content light level metadata",
    "dovi configuration record",
    "dolby vision",
];
const HDR_PROFILE_HINTS: &[&str] = &["dolby vision", "dovi", "hdr10", "hlg"];

/// Maps a raw probe onto the closed attribute vocabulary used by tier rules.
#[derive(Debug, Clone)]
pub struct Normalizer {
    horizontal_4k_threshold: u32,
    uhd_min_height: u32,
    fhd_min_height: u32,
    hd_min_height: u32,
    extra_hdr_transfers: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

impl From<&ClassificationConfig> for Normalizer {
    fn from(cfg: &ClassificationConfig) -> Self {
        Self {
            horizontal_4k_threshold: cfg.horizontal_4k_threshold,
            uhd_min_height: cfg.uhd_min_height,
            fhd_min_height: cfg.fhd_min_height,
            hd_min_height: cfg.hd_min_height,
            extra_hdr_transfers: cfg
                .extra_hdr_transfers
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Normalizer {
    pub fn normalize(&self, raw: &RawProbe) -> NormalizedAttributes {
        let video = primary_video(raw);
        let audio = primary_audio(raw);

        NormalizedAttributes {
            resolution_class: video
                .map(|v| self.resolution_of(v))
                .unwrap_or(ResolutionClass::Unknown),
            is_hdr: video.map(|v| self.is_hdr(v)).unwrap_or(false),
            video_codec: video.map(video_codec_of).unwrap_or(VideoCodec::Unknown),
            audio_codec: audio.map(audio_codec_of).unwrap_or(AudioCodec::Unknown),
            audio_channels: audio.and_then(|a| a.channels).unwrap_or(0),
            frame_rate: video.and_then(|v| v.frame_rate),
            bit_rate: raw.bit_rate,
        }
    }

    fn resolution_of(&self, v: &StreamDescriptor) -> ResolutionClass {
        if v.width.is_some_and(|w| w >= self.horizontal_4k_threshold) {
            return ResolutionClass::Uhd2160;
        }
        match v.height {
            None | Some(0) => ResolutionClass::Unknown,
            Some(h) if h >= self.uhd_min_height => ResolutionClass::Uhd2160,
            Some(h) if h >= self.fhd_min_height => ResolutionClass::Hd1080,
            Some(h) if h >= self.hd_min_height => ResolutionClass::Hd720,
            Some(_) => ResolutionClass::Sd,
        }
    }

    fn is_hdr(&self, v: &StreamDescriptor) -> bool {
        if let Some(transfer) = v.color_transfer.as_deref() {
            let t = transfer.to_ascii_lowercase();
            if HDR_TRANSFERS.contains(&t.as_str()) || self.extra_hdr_transfers.contains(&t) {
                return true;
            }
        }
        if v
            .color_primaries
            .as_deref()
            .is_some_and(|p| HDR_PRIMARIES.contains(&p.to_ascii_lowercase().as_str()))
        {
            return true;
        }
        let side_data_hit = v.side_data.iter().any(|sd| {
            let sd = sd.to_ascii_lowercase();
            HDR_SIDE_DATA.iter().any(|hint| sd.contains(hint))
        });
        if side_data_hit {
            return true;
        }
        v.profile.as_deref().is_some_and(|p| {
            let p = p.to_ascii_lowercase();
            HDR_PROFILE_HINTS.iter().any(|hint| p.contains(hint))
        })
    }
}

/// Normalizes with the default thresholds.
pub fn normalize(raw: &RawProbe) -> NormalizedAttributes {
    Normalizer::default().normalize(raw)
}

fn area(s: &StreamDescriptor) -> u64 {
    u64::from(s.width.unwrap_or(0)) * u64::from(s.height.unwrap_or(0))
}

// `Iterator::max_by_key` keeps the last maximum; ties must go to the earliest stream.
fn first_max_by<'a, K: Ord>(
    streams: impl Iterator<Item = &'a StreamDescriptor>,
    key: impl Fn(&StreamDescriptor) -> K,
) -> Option<&'a StreamDescriptor> {
    streams.fold(None, |best, s| match best {
        Some(b) if key(s) <= key(b) => Some(b),
        _ => Some(s),
    })
}

pub fn primary_video(raw: &RawProbe) -> Option<&StreamDescriptor> {
    first_max_by(raw.streams_of(StreamKind::Video), area)
}

pub fn primary_audio(raw: &RawProbe) -> Option<&StreamDescriptor> {
    first_max_by(raw.streams_of(StreamKind::Audio), |s| s.channels.unwrap_or(0))
}

fn video_codec_of(v: &StreamDescriptor) -> VideoCodec {
    let Some(codec) = v.codec.as_deref() else {
        return VideoCodec::Unknown;
    };
    match codec.to_ascii_lowercase().as_str() {
        "h264" | "avc" | "avc1" | "x264" => VideoCodec::H264,
        "hevc" | "h265" | "hev1" | "hvc1" | "x265" => VideoCodec::Hevc,
        "av1" | "av01" | "libdav1d" | "libaom-av1" => VideoCodec::Av1,
        _ => VideoCodec::Other,
    }
}

fn audio_codec_of(a: &StreamDescriptor) -> AudioCodec {
    let Some(codec) = a.codec.as_deref() else {
        return AudioCodec::Unknown;
    };
    let codec = codec.to_ascii_lowercase();
    let profile = a.profile.as_deref().unwrap_or("").to_ascii_lowercase();

    if codec.contains("truehd") || profile.contains("truehd") {
        return AudioCodec::TrueHd;
    }
    if codec.starts_with("dts") {
        let hd = codec.contains("hd")
            || profile.contains("dts-hd")
            || profile.contains("hd ma")
            || profile.contains("hd hra")
            || profile.contains("dts:x");
        return if hd { AudioCodec::DtsHd } else { AudioCodec::Dts };
    }
    match codec.as_str() {
        "eac3" | "e-ac-3" | "ec-3" | "ddp" => AudioCodec::Ddp,
        "ac3" | "ac-3" | "dd" => AudioCodec::Dd,
        "aac" | "aac_latm" | "mp4a" => AudioCodec::Aac,
        _ => AudioCodec::Other,
    }
}
