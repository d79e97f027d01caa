//! Pipeline configuration
//!
//! One record parameterizes every variant of the pipeline (resize target,
//! frame rate, palette size, rotation strategy). Defaults reproduce the
//! reference behavior; a JSON file and CLI flags may override them.

use crate::error::{PipelineError, Result};
use crate::orientation::RotationPolicy;
use serde::{Deserialize, Serialize};
use shared_utils::FileSize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths (or `PATH` names) of the external tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// GIF frames wider than this are scaled down to it.
    pub max_width: u32,
    pub target_fps: u32,
    /// Palette size for GIF quantization (2..=256).
    pub max_colors: u32,
    /// Rotate with an explicit ffmpeg filter; when false ffmpeg's built-in
    /// autorotation applies the display matrix instead.
    pub use_external_rotate_filter: bool,
    pub max_clip_seconds: f64,
    pub max_upload_bytes: u64,
    /// Re-encode the first audio track to AAC instead of dropping audio.
    pub keep_audio: bool,
    pub rotation_policy: RotationPolicy,

    pub video_codec: String,
    pub crf: u8,
    pub preset: String,
    pub pix_fmt: String,
    pub audio_codec: String,

    /// Fixed part of each external tool deadline.
    pub timeout_base_secs: u64,
    /// Added per started second of clip.
    pub timeout_secs_per_clip_second: u64,

    pub tools: ToolPaths,
    pub accepted_extensions: Vec<String>,
    /// Parent for session scratch directories (system temp dir when unset).
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_width: 640,
            target_fps: 15,
            max_colors: 256,
            use_external_rotate_filter: true,
            max_clip_seconds: 15.0,
            max_upload_bytes: 100 * FileSize::MB,
            keep_audio: false,
            rotation_policy: RotationPolicy::Lenient,
            video_codec: "libx264".to_string(),
            crf: 18,
            preset: "veryfast".to_string(),
            pix_fmt: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            timeout_base_secs: 30,
            timeout_secs_per_clip_second: 10,
            tools: ToolPaths::default(),
            accepted_extensions: ["mp4", "mov", "avi", "m4v", "mpeg", "mkv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_width == 0 {
            return Err(PipelineError::Config("max_width must be positive".into()));
        }
        if self.target_fps == 0 {
            return Err(PipelineError::Config("target_fps must be positive".into()));
        }
        if !(2..=256).contains(&self.max_colors) {
            return Err(PipelineError::Config(format!(
                "max_colors must be within 2..=256, got {}",
                self.max_colors
            )));
        }
        if !self.max_clip_seconds.is_finite() || self.max_clip_seconds <= 0.0 {
            return Err(PipelineError::Config(
                "max_clip_seconds must be a positive number".into(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(PipelineError::Config("max_upload_bytes must be positive".into()));
        }
        if self.video_codec.trim().is_empty() || self.pix_fmt.trim().is_empty() {
            return Err(PipelineError::Config("encoder settings must not be empty".into()));
        }
        if self.accepted_extensions.is_empty() {
            return Err(PipelineError::Config(
                "accepted_extensions must list at least one extension".into(),
            ));
        }
        Ok(())
    }

    pub fn max_upload_size(&self) -> FileSize {
        FileSize::new(self.max_upload_bytes)
    }

    /// Case-insensitive check of a file name's extension.
    pub fn accepts_extension(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.accepted_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Deadline for one external invocation over a clip of `clip_seconds`.
    pub fn timeout_for(&self, clip_seconds: f64) -> Duration {
        let started_seconds = if clip_seconds.is_finite() && clip_seconds > 0.0 {
            clip_seconds.ceil() as u64
        } else {
            0
        };
        Duration::from_secs(
            self.timeout_base_secs
                .saturating_add(self.timeout_secs_per_clip_second.saturating_mul(started_seconds)),
        )
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_base_secs)
    }
}
