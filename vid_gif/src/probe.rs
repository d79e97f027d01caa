//! Metadata Prober
//!
//! Reads container/stream metadata through ffprobe without decoding frames
//! and condenses it into an immutable [`MediaDescriptor`].

use crate::error::{PipelineError, Result};
use crate::orientation::{Rotation, RotationPolicy};
use serde::Serialize;
use shared_utils::{parse_frame_rate, probe_json, FfprobeOutput, RunLimits};
use std::path::Path;
use tracing::{debug, info};

const MODEL_TAGS: [&str; 3] = ["com.apple.quicktime.model", "com.android.model", "model"];
const MAKE_TAGS: [&str; 3] = ["com.apple.quicktime.make", "com.android.manufacturer", "make"];

/// Probe result for one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaDescriptor {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// Clockwise display rotation, already normalized.
    pub rotation: Rotation,
    /// Recording device, empty when the container does not say.
    pub device_label: String,
    pub size_bytes: u64,
    pub frame_rate: Option<f64>,
    /// `nb_frames` when the container records it.
    pub frame_count: Option<u64>,
    pub has_audio: bool,
}

impl MediaDescriptor {
    /// Displayed frame size once the rotation hint is honoured.
    pub fn display_dimensions(&self) -> (u32, u32) {
        self.rotation.transform().output_dimensions(self.width, self.height)
    }
}

/// Run ffprobe on `path` and build its descriptor.
pub fn probe(
    ffprobe: &Path,
    path: &Path,
    policy: RotationPolicy,
    limits: &RunLimits,
) -> Result<MediaDescriptor> {
    debug!(input = %path.display(), "Probing media");
    let output =
        probe_json(ffprobe, path, limits).map_err(|e| PipelineError::from_ffprobe(path, e))?;
    let fallback_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let descriptor = descriptor_from_ffprobe(&output, path, fallback_size, policy)?;
    info!(
        input = %path.display(),
        duration = descriptor.duration_seconds,
        width = descriptor.width,
        height = descriptor.height,
        rotation = descriptor.rotation.degrees(),
        device = %descriptor.device_label,
        "Probed media"
    );
    Ok(descriptor)
}

/// Build a descriptor from parsed ffprobe output.
///
/// Pure: the same output always yields the same descriptor.
pub fn descriptor_from_ffprobe(
    output: &FfprobeOutput,
    path: &Path,
    fallback_size: u64,
    policy: RotationPolicy,
) -> Result<MediaDescriptor> {
    let video = output
        .first_video_stream()
        .ok_or_else(|| PipelineError::probe(path, "no video stream found"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(PipelineError::probe(path, "video stream has no dimensions")),
    };

    let format = output.format.as_ref();
    let duration_seconds = format
        .and_then(|f| f.duration_secs())
        .or_else(|| video.duration_secs())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let size_bytes = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(fallback_size);

    let rotation = match rotation_hint(output) {
        Some(raw) => Rotation::with_policy(raw, policy)?,
        None => Rotation::Deg0,
    };

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .or(video.r_frame_rate.as_deref())
        .filter(|r| !r.is_empty() && *r != "0/0")
        .map(parse_frame_rate);

    Ok(MediaDescriptor {
        duration_seconds,
        width,
        height,
        rotation,
        device_label: device_label(output),
        size_bytes,
        frame_rate,
        frame_count: video.frame_count(),
        has_audio: output.has_audio(),
    })
}

/// Raw clockwise rotation hint, first match wins:
/// 1. video stream `tags.rotate`
/// 2. video stream display matrix (anticlockwise, so negated)
/// 3. container `tags.rotate`
pub fn rotation_hint(output: &FfprobeOutput) -> Option<f64> {
    let video = output.first_video_stream();

    if let Some(tag) = video.and_then(|v| v.tag("rotate")) {
        if let Ok(deg) = tag.trim().parse::<f64>() {
            return Some(deg);
        }
    }

    if let Some(matrix) = video.and_then(|v| v.display_matrix_rotation()) {
        return Some(-matrix);
    }

    output
        .format_tag("rotate")
        .and_then(|tag| tag.trim().parse::<f64>().ok())
}

/// "Make Model" from container tags, or whichever half is present.
pub fn device_label(output: &FfprobeOutput) -> String {
    let first_tag = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| output.format_tag(k))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    };

    match (first_tag(&MAKE_TAGS), first_tag(&MODEL_TAGS)) {
        (Some(make), Some(model)) if model.starts_with(&make) => model,
        (Some(make), Some(model)) => format!("{} {}", make, model),
        (None, Some(model)) => model,
        (Some(make), None) => make,
        (None, None) => String::new(),
    }
}
