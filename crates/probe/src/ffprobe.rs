use crate::{MediaProber, ProbeError, RawProbe, StreamDescriptor, StreamKind};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_ARGS: &[&str] = &[
    "-v",
    "error",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

#[derive(Debug, Clone)]
pub struct FfprobeConfig {
    pub bin: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for FfprobeConfig {
    fn default() -> Self {
        Self {
            bin: "ffprobe".to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    cfg: Arc<FfprobeConfig>,
}

impl FfprobeProber {
    pub fn new(cfg: FfprobeConfig) -> Self {
        Self { cfg: Arc::new(cfg) }
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<RawProbe, ProbeError> {
        let mut cmd = Command::new(&self.cfg.bin);
        cmd.args(&self.cfg.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProbeError::NotFound(self.cfg.bin.clone()),
            _ => ProbeError::Spawn(e.to_string()),
        })?;

        debug!(path = %path.display(), bin = %self.cfg.bin, "running probe");
        // Dropping the wait future on timeout kills the child.
        let output = tokio::time::timeout(self.cfg.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.cfg.timeout.as_secs()))?
            .map_err(|e| ProbeError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProbeError::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        parse_output(&output.stdout)
    }
}

/// Parses `-show_format -show_streams` JSON. ffprobe reports most numbers as
/// strings, so every numeric field accepts either form.
pub fn parse_output(bytes: &[u8]) -> Result<RawProbe, ProbeError> {
    let json: Value =
        serde_json::from_slice(bytes).map_err(|e| ProbeError::Parse(e.to_string()))?;
    if !json.is_object() {
        return Err(ProbeError::Parse("top-level value is not an object".into()));
    }

    let format = json.get("format");
    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .map(|arr| {
            arr.iter()
                .enumerate()
                .filter(|(_, s)| s.is_object())
                .map(|(pos, s)| parse_stream(pos as u32, s))
                .collect()
        })
        .unwrap_or_default();

    Ok(RawProbe {
        container: format.and_then(|f| str_field(f, "format_name")),
        duration_s: format.and_then(|f| f64_field(f, "duration")),
        bit_rate: format.and_then(|f| u64_field(f, "bit_rate")),
        streams,
    })
}

fn parse_stream(pos: u32, s: &Value) -> StreamDescriptor {
    let kind = s
        .get("codec_type")
        .and_then(|v| v.as_str())
        .map(StreamKind::from)
        .unwrap_or(StreamKind::Other);
    let index = u64_field(s, "index").map(|i| i as u32).unwrap_or(pos);

    let mut side_data: Vec<String> = s
        .get("side_data_list")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|sd| sd.get("side_data_type").and_then(|t| t.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    side_data.sort();
    side_data.dedup();

    StreamDescriptor {
        index,
        kind,
        codec: str_field(s, "codec_name"),
        profile: str_field(s, "profile"),
        width: u64_field(s, "width").map(|v| v as u32),
        height: u64_field(s, "height").map(|v| v as u32),
        pix_fmt: str_field(s, "pix_fmt"),
        color_transfer: str_field(s, "color_transfer"),
        color_primaries: str_field(s, "color_primaries"),
        side_data,
        channels: u64_field(s, "channels").map(|v| v as u32),
        channel_layout: str_field(s, "channel_layout"),
        bit_rate: u64_field(s, "bit_rate"),
        frame_rate: ratio_field(s, "avg_frame_rate").or_else(|| ratio_field(s, "r_frame_rate")),
    }
}

/// `"24000/1001"` style rates; `0/0` and other degenerate values are `None`.
fn ratio_field(v: &Value, key: &str) -> Option<f64> {
    let raw = v.get(key)?.as_str()?.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
}

fn u64_field(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn f64_field(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
