//! FFprobe wrapper module
//!
//! Runs `ffprobe -show_format -show_streams` with JSON output and
//! deserializes the result into typed structs. Interpretation of the fields
//! (rotation hints, dimensions, durations) is left to callers.

use crate::ffmpeg_process::{format_ffmpeg_error, run_tool, ProcessOutcome, RunLimits};
use crate::tools::safe_path_arg;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FFprobeError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("FFprobe failed: {0}")]
    ExecutionFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("FFprobe timed out after {0:.1}s")]
    TimedOut(f64),

    #[error("FFprobe cancelled")]
    Cancelled,
}

/// Top level of `ffprobe -print_format json` output.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: Option<FfprobeFormat>,
}

impl FfprobeOutput {
    pub fn first_video_stream(&self) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    }

    /// Container tag lookup (`format.tags`).
    pub fn format_tag(&self, key: &str) -> Option<&str> {
        self.format
            .as_ref()
            .and_then(|f| f.tags.get(key))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeFormat {
    #[serde(default)]
    pub format_name: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl FfprobeFormat {
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.as_deref().and_then(|d| d.trim().parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeStream {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub avg_frame_rate: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub nb_frames: Option<String>,
    #[serde(default)]
    pub pix_fmt: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub side_data_list: Vec<SideData>,
}

impl FfprobeStream {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.as_deref().and_then(|d| d.trim().parse().ok())
    }

    pub fn frame_count(&self) -> Option<u64> {
        self.nb_frames.as_deref().and_then(|n| n.trim().parse().ok())
    }

    /// `rotation` of the first "Display Matrix" side data entry.
    pub fn display_matrix_rotation(&self) -> Option<f64> {
        self.side_data_list
            .iter()
            .find(|sd| sd.side_data_type.as_deref() == Some("Display Matrix"))
            .and_then(|sd| sd.rotation_degrees())
    }
}

/// One entry of `side_data_list`. `rotation` is an integer in most ffprobe
/// builds but a float or string in some, so it stays untyped here.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SideData {
    #[serde(default)]
    pub side_data_type: Option<String>,
    #[serde(default)]
    pub rotation: Option<serde_json::Value>,
}

impl SideData {
    pub fn rotation_degrees(&self) -> Option<f64> {
        match self.rotation.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Probe `input` with the ffprobe binary at `program`.
pub fn probe_json(
    program: &Path,
    input: &Path,
    limits: &RunLimits,
) -> Result<FfprobeOutput, FFprobeError> {
    if !input.is_file() {
        return Err(FFprobeError::ExecutionFailed(format!(
            "File not found: {}",
            input.display()
        )));
    }

    let args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        safe_path_arg(input).into_owned(),
    ];

    let outcome = run_tool(program, &args, limits, None).map_err(|e| {
        FFprobeError::ToolNotFound(format!("{}: {:#}", program.display(), e))
    })?;

    match outcome {
        ProcessOutcome::Completed { status, stdout, stderr, .. } => {
            if !status.success() {
                let message = if stderr.trim().is_empty() {
                    format!(
                        "ffprobe failed to analyze file: {} (exit code: {:?})",
                        input.display(),
                        status.code()
                    )
                } else {
                    format!(
                        "ffprobe error for '{}': {}",
                        input.display(),
                        format_ffmpeg_error(&stderr)
                    )
                };
                return Err(FFprobeError::ExecutionFailed(message));
            }
            parse_probe_output(&stdout)
        }
        ProcessOutcome::TimedOut { elapsed, .. } => {
            Err(FFprobeError::TimedOut(elapsed.as_secs_f64()))
        }
        ProcessOutcome::Cancelled { .. } => Err(FFprobeError::Cancelled),
    }
}

/// Deserialize ffprobe JSON text.
pub fn parse_probe_output(json: &str) -> Result<FfprobeOutput, FFprobeError> {
    serde_json::from_str(json).map_err(|e| FFprobeError::ParseError(e.to_string()))
}

const FALLBACK_FRAME_RATE: f64 = 24.0;

/// Parse `30000/1001` or `29.97` style frame rates.
pub fn parse_frame_rate(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(0.0);
        if den > 0.0 && num / den > 0.0 {
            return num / den;
        }
    }
    match s.parse::<f64>() {
        Ok(v) if v > 0.0 => v,
        _ => {
            if !s.is_empty() && s != "0" && s != "0/0" && s != "0/1" {
                warn!(value = s, fallback = FALLBACK_FRAME_RATE, "Failed to parse frame rate");
            }
            FALLBACK_FRAME_RATE
        }
    }
}
