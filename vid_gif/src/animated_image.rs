//! Downscale-and-Encode Stage
//!
//! Turns an orientation-normalized clip into a palette GIF:
//! 1. probe the clip for its real (already rotated) frame size
//! 2. shrink to `max_width` keeping the aspect ratio (floor rounding)
//! 3. `palettegen` pass limited to `max_colors`
//! 4. `paletteuse` pass at `target_fps`

use crate::artifact::{partial_path_for, remove_if_exists, ArtifactRole, PipelineArtifact};
use crate::error::{PipelineError, Result};
use crate::input_lock::InputLease;
use crate::orientation::RotationPolicy;
use crate::pipeline::PipelineContext;
use crate::probe::probe;
use shared_utils::{
    format_ffmpeg_error, log_operation_end, run_tool, safe_path_arg, ProcessOutcome,
    ProgressSink, RunLimits,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// GIF encode parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GifSettings {
    pub max_width: u32,
    pub target_fps: u32,
    pub max_colors: u32,
}

/// A committed GIF and its frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedGif {
    pub artifact: PipelineArtifact,
    pub width: u32,
    pub height: u32,
}

/// Frame size after enforcing `max_width`.
///
/// Wider frames become `max_width` wide and `floor(height * max_width /
/// width)` tall (at least 1); narrower frames pass through unchanged.
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width > max_width {
        let scaled = (height as u64 * max_width as u64) / width as u64;
        (max_width, scaled.max(1) as u32)
    } else {
        (width, height)
    }
}

fn scale_filter(source: (u32, u32), target: (u32, u32), fps: u32) -> String {
    if source == target {
        format!("fps={}", fps)
    } else {
        format!("fps={},scale={}:{}:flags=lanczos", fps, target.0, target.1)
    }
}

pub fn palette_filter(source: (u32, u32), target: (u32, u32), settings: &GifSettings) -> String {
    format!(
        "{},palettegen=max_colors={}:stats_mode=diff",
        scale_filter(source, target, settings.target_fps),
        settings.max_colors
    )
}

pub fn paletteuse_filter(source: (u32, u32), target: (u32, u32), settings: &GifSettings) -> String {
    format!(
        "{}[x];[x][1:v]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle",
        scale_filter(source, target, settings.target_fps)
    )
}

/// Removes the intermediate palette image however the stage exits.
struct PaletteGuard<'a> {
    path: &'a Path,
}

impl Drop for PaletteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove temp palette file");
        }
    }
}

/// Render `clip` into a GIF at `output`.
pub fn render_animated_image(
    ctx: &PipelineContext,
    clip: &Path,
    output: &Path,
    settings: &GifSettings,
) -> Result<RenderedGif> {
    let started = Instant::now();
    let result = run_render(ctx, clip, output, settings);
    log_operation_end(ArtifactRole::GifOutput.as_str(), started.elapsed(), result.is_ok());
    result
}

fn run_render(
    ctx: &PipelineContext,
    clip: &Path,
    output: &Path,
    settings: &GifSettings,
) -> Result<RenderedGif> {
    if ctx.token.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let probe_limits = RunLimits::new(ctx.config.probe_timeout()).with_token(ctx.token.clone());
    let clip_info = probe(&ctx.tools.ffprobe, clip, RotationPolicy::Lenient, &probe_limits)
        .map_err(|e| match e {
            PipelineError::Probe { message, .. } => {
                PipelineError::encode(format!("cannot read normalized clip: {}", message))
            }
            other => other,
        })?;

    if clip_info.frame_count == Some(0) || clip_info.duration_seconds <= 0.0 {
        return Err(PipelineError::encode("normalized clip has no readable frames"));
    }

    let source = (clip_info.width, clip_info.height);
    let target = target_dimensions(source.0, source.1, settings.max_width);
    info!(
        input = %clip.display(),
        width = source.0,
        height = source.1,
        target_width = target.0,
        target_height = target.1,
        fps = settings.target_fps,
        colors = settings.max_colors,
        "Encoding GIF"
    );

    let limits = RunLimits::new(ctx.config.timeout_for(clip_info.duration_seconds))
        .with_token(ctx.token.clone());
    let palette_path = palette_path_for(output);
    let _palette_guard = PaletteGuard {
        path: &palette_path,
    };
    let partial = partial_path_for(output);
    remove_if_exists(&partial)?;

    let _lease = InputLease::acquire(clip);

    let palette_args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        safe_path_arg(clip).into_owned(),
        "-vf".to_string(),
        palette_filter(source, target, settings),
        safe_path_arg(&palette_path).into_owned(),
    ];
    let outcome = run_tool(&ctx.tools.ffmpeg, &palette_args, &limits, None);
    check_outcome(outcome, "palette generation")?;

    let progress = ctx.progress.clone().map(|callback| ProgressSink {
        total_duration: clip_info.duration_seconds,
        callback,
    });
    let encode_args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        safe_path_arg(clip).into_owned(),
        "-i".to_string(),
        safe_path_arg(&palette_path).into_owned(),
        "-lavfi".to_string(),
        paletteuse_filter(source, target, settings),
        "-loop".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "gif".to_string(),
        safe_path_arg(&partial).into_owned(),
    ];
    let outcome = run_tool(&ctx.tools.ffmpeg, &encode_args, &limits, progress);
    if let Err(e) = check_outcome(outcome, "GIF encode") {
        discard(&partial);
        return Err(e);
    }

    let size = fs::metadata(&partial).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        discard(&partial);
        return Err(PipelineError::encode(
            "GIF output file is empty (encoding may have failed)",
        ));
    }

    if let Err(e) = fs::rename(&partial, output) {
        discard(&partial);
        return Err(e.into());
    }

    info!(output = %output.display(), size, "GIF written");
    Ok(RenderedGif {
        artifact: PipelineArtifact::new(output, ArtifactRole::GifOutput),
        width: target.0,
        height: target.1,
    })
}

fn palette_path_for(output: &Path) -> PathBuf {
    output.with_extension("palette.png")
}

fn check_outcome(outcome: anyhow::Result<ProcessOutcome>, step: &str) -> Result<()> {
    match outcome {
        Ok(ProcessOutcome::Completed { status, .. }) if status.success() => Ok(()),
        Ok(ProcessOutcome::Completed { status, stderr, .. }) => Err(PipelineError::Encode {
            message: format!("{} failed: {}", step, format_ffmpeg_error(&stderr)),
            stderr,
            exit_code: status.code(),
        }),
        Ok(ProcessOutcome::TimedOut { stderr, elapsed }) => Err(PipelineError::Encode {
            message: format!("{} timed out after {:.1}s", step, elapsed.as_secs_f64()),
            stderr,
            exit_code: None,
        }),
        Ok(ProcessOutcome::Cancelled { .. }) => Err(PipelineError::Cancelled),
        Err(e) => Err(PipelineError::encode(format!("{}: {:#}", step, e))),
    }
}

fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove partial GIF");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: GifSettings = GifSettings {
        max_width: 640,
        target_fps: 15,
        max_colors: 256,
    };

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(1920, 1080, 640), (640, 360));
        assert_eq!(target_dimensions(1080, 1920, 640), (640, 1137));
        assert_eq!(target_dimensions(640, 360, 640), (640, 360));
        assert_eq!(target_dimensions(320, 240, 640), (320, 240));
        assert_eq!(target_dimensions(10_000, 1, 640), (640, 1));
    }

    #[test]
    fn test_palette_filter_with_resize() {
        assert_eq!(
            palette_filter((1920, 1080), (640, 360), &SETTINGS),
            "fps=15,scale=640:360:flags=lanczos,palettegen=max_colors=256:stats_mode=diff"
        );
        assert_eq!(
            paletteuse_filter((1920, 1080), (640, 360), &SETTINGS),
            "fps=15,scale=640:360:flags=lanczos[x];[x][1:v]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle"
        );
    }

    #[test]
    fn test_pass_through_has_no_scale() {
        let settings = GifSettings {
            max_colors: 64,
            ..SETTINGS
        };
        assert_eq!(
            palette_filter((640, 360), (640, 360), &settings),
            "fps=15,palettegen=max_colors=64:stats_mode=diff"
        );
        assert!(!paletteuse_filter((640, 360), (640, 360), &settings).contains("scale"));
    }

    #[test]
    fn test_palette_guard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gif-output-3.gif");
        let palette = palette_path_for(&output);
        assert_eq!(palette.file_name().unwrap(), "gif-output-3.palette.png");
        fs::write(&palette, b"PNG").unwrap();
        {
            let _guard = PaletteGuard { path: &palette };
        }
        assert!(!palette.exists());
    }
}
