//! Trim-Transcode Executor
//!
//! One ffmpeg invocation cuts `[start, end]`, applies the orientation
//! transform and re-encodes. The output carries an explicit `rotate=0` and
//! no inherited metadata, so players never rotate the already rotated
//! pixels a second time.
//!
//! ffmpeg writes to `name.partial.ext`. The file is re-probed and only
//! renamed into place when it reports rotation 0 and the expected frame
//! size; on any failure the partial file is removed.

use crate::artifact::{partial_path_for, remove_if_exists, ArtifactRole, PipelineArtifact};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::input_lock::InputLease;
use crate::orientation::{OrientationTransform, Rotation};
use crate::pipeline::PipelineContext;
use crate::probe::rotation_hint;
use crate::trim::TrimRange;
use shared_utils::{
    format_ffmpeg_error, log_operation_end, probe_json, run_tool, safe_path_arg, ExternalTools,
    FFprobeError, ProcessOutcome, ProgressSink, RunLimits,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the source rotation gets undone.
///
/// Both strategies rotate the pixels by the resolved [`OrientationTransform`];
/// they differ only in whether our filter or ffmpeg's autorotation does it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Disable input autorotation and rotate with an explicit `-vf` filter.
    /// `override_display_rotation` selects `-display_rotation:v:0 0`
    /// (ffmpeg 7+) over `-noautorotate`.
    ExternalFilter { override_display_rotation: bool },
    /// Replace the input display rotation with the resolved angle
    /// (`-display_rotation`, ffmpeg 7+) and let autorotation apply it.
    Autorotate,
}

impl RotationStrategy {
    pub fn select(config: &PipelineConfig, tools: &ExternalTools) -> Self {
        let modern = tools.supports_display_rotation_override();
        if config.use_external_rotate_filter {
            return RotationStrategy::ExternalFilter {
                override_display_rotation: modern,
            };
        }
        if modern {
            RotationStrategy::Autorotate
        } else {
            warn!(
                ffmpeg_major = ?tools.ffmpeg_major,
                "ffmpeg cannot override the display rotation, using the rotation filter"
            );
            RotationStrategy::ExternalFilter {
                override_display_rotation: false,
            }
        }
    }
}

/// `-display_rotation` value for the Autorotate strategy. The option takes
/// an anticlockwise angle, which is exactly the turn the resolved transform
/// applies.
fn autorotate_display_rotation(rotation: Rotation) -> u16 {
    rotation.degrees()
}

/// One trim + normalize job.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub role: ArtifactRole,
    pub range: TrimRange,
    pub rotation: Rotation,
    /// Stored (pre-rotation) frame size of the input.
    pub source_dimensions: (u32, u32),
}

impl TranscodeRequest {
    pub fn transform(&self) -> OrientationTransform {
        self.rotation.transform()
    }

    pub fn expected_dimensions(&self) -> (u32, u32) {
        let (w, h) = self.source_dimensions;
        self.transform().output_dimensions(w, h)
    }
}

/// Full ffmpeg argument list for `request`, writing to `output`.
pub fn build_transcode_args(
    request: &TranscodeRequest,
    output: &Path,
    config: &PipelineConfig,
    strategy: RotationStrategy,
) -> Vec<String> {
    let transform = request.transform();
    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-v",
        "error",
        "-progress",
        "pipe:1",
        "-nostats",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    match strategy {
        RotationStrategy::ExternalFilter {
            override_display_rotation: true,
        } => args.extend(["-display_rotation:v:0".to_string(), "0".to_string()]),
        RotationStrategy::ExternalFilter {
            override_display_rotation: false,
        } => args.push("-noautorotate".to_string()),
        RotationStrategy::Autorotate => args.extend([
            "-display_rotation:v:0".to_string(),
            autorotate_display_rotation(request.rotation).to_string(),
        ]),
    }

    args.push("-i".to_string());
    args.push(safe_path_arg(&request.input).into_owned());

    // output-side seeking: both times are absolute positions in the input.
    // ffmpeg aborts on `-to <= -ss`, so an unknown (zero) duration runs to
    // the end of the input.
    args.push("-ss".to_string());
    args.push(format!("{:.3}", request.range.start));
    if request.range.end > request.range.start {
        args.push("-to".to_string());
        args.push(format!("{:.3}", request.range.end));
    }

    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    if config.keep_audio {
        args.extend([
            "-map".to_string(),
            "0:a:0?".to_string(),
            "-c:a".to_string(),
            config.audio_codec.clone(),
        ]);
    } else {
        args.push("-an".to_string());
    }

    if matches!(strategy, RotationStrategy::ExternalFilter { .. }) && !transform.is_identity() {
        args.push("-vf".to_string());
        args.push(transform.filter_spec.clone());
    }

    args.extend([
        "-c:v".to_string(),
        config.video_codec.clone(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-preset".to_string(),
        config.preset.clone(),
        "-pix_fmt".to_string(),
        config.pix_fmt.clone(),
        "-map_metadata".to_string(),
        "-1".to_string(),
        "-metadata:s:v:0".to_string(),
        "rotate=0".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]);

    args.push(safe_path_arg(output).into_owned());
    args
}

/// Run the transcode described by `request`.
pub fn transcode(ctx: &PipelineContext, request: &TranscodeRequest) -> Result<PipelineArtifact> {
    let started = Instant::now();
    let result = run_transcode(ctx, request);
    log_operation_end(request.role.as_str(), started.elapsed(), result.is_ok());
    result
}

fn run_transcode(ctx: &PipelineContext, request: &TranscodeRequest) -> Result<PipelineArtifact> {
    if ctx.token.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let strategy = RotationStrategy::select(&ctx.config, &ctx.tools);
    let partial = partial_path_for(&request.output);
    remove_if_exists(&partial)?;

    let args = build_transcode_args(request, &partial, &ctx.config, strategy);
    let limits = RunLimits::new(ctx.config.timeout_for(request.range.length()))
        .with_token(ctx.token.clone());
    let progress = ctx.progress.clone().map(|callback| ProgressSink {
        total_duration: request.range.length(),
        callback,
    });

    info!(
        input = %request.input.display(),
        role = %request.role,
        rotation = request.rotation.degrees(),
        filter = %request.transform().filter_spec,
        start = request.range.start,
        end = request.range.end,
        strategy = ?strategy,
        "Transcoding"
    );

    let outcome = {
        let _lease = InputLease::acquire(&request.input);
        run_tool(&ctx.tools.ffmpeg, &args, &limits, progress)
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            discard_partial(&partial);
            return Err(PipelineError::transcode(format!("{:#}", e)));
        }
    };

    match outcome {
        ProcessOutcome::Completed { status, .. } if status.success() => {}
        ProcessOutcome::Completed { status, stderr, .. } => {
            discard_partial(&partial);
            return Err(PipelineError::Transcode {
                message: format_ffmpeg_error(&stderr),
                stderr,
                exit_code: status.code(),
            });
        }
        ProcessOutcome::TimedOut { stderr, elapsed } => {
            discard_partial(&partial);
            return Err(PipelineError::Transcode {
                message: format!("ffmpeg timed out after {:.1}s", elapsed.as_secs_f64()),
                stderr,
                exit_code: None,
            });
        }
        ProcessOutcome::Cancelled { .. } => {
            discard_partial(&partial);
            return Err(PipelineError::Cancelled);
        }
    }

    if let Err(e) = verify_output(ctx, request, &partial) {
        discard_partial(&partial);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&partial, &request.output) {
        discard_partial(&partial);
        return Err(e.into());
    }

    let artifact = PipelineArtifact::new(&request.output, request.role);
    debug!(
        output = %artifact.path.display(),
        size = artifact.size_bytes(),
        "Transcode output committed"
    );
    Ok(artifact)
}

/// The written file must be non-empty, carry no rotation and have the
/// post-transform frame size.
fn verify_output(ctx: &PipelineContext, request: &TranscodeRequest, written: &Path) -> Result<()> {
    let size = std::fs::metadata(written).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(PipelineError::transcode("ffmpeg produced an empty output file"));
    }

    let limits = RunLimits::new(ctx.config.probe_timeout()).with_token(ctx.token.clone());
    let probed = probe_json(&ctx.tools.ffprobe, written, &limits).map_err(|e| match e {
        FFprobeError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::transcode(format!("cannot verify output: {}", other)),
    })?;

    if let Some(raw) = rotation_hint(&probed) {
        if Rotation::from_degrees(raw) != Some(Rotation::Deg0) {
            return Err(PipelineError::transcode(format!(
                "output still carries a {} degree rotation",
                raw
            )));
        }
    }

    let video = probed
        .first_video_stream()
        .ok_or_else(|| PipelineError::transcode("output has no video stream"))?;
    let actual = (video.width.unwrap_or(0), video.height.unwrap_or(0));
    let expected = request.expected_dimensions();
    if actual != expected {
        return Err(PipelineError::transcode(format!(
            "output is {}x{}, expected {}x{}",
            actual.0, actual.1, expected.0, expected.1
        )));
    }

    info!(
        width = actual.0,
        height = actual.1,
        "Transcode output verified"
    );
    Ok(())
}

fn discard_partial(partial: &Path) {
    if let Err(e) = remove_if_exists(partial) {
        warn!(path = %partial.display(), error = %e, "Failed to remove partial output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rotation: Rotation) -> TranscodeRequest {
        TranscodeRequest {
            input: PathBuf::from("/work/upload-1.mov"),
            output: PathBuf::from("/work/trimmed-normalized-2.mp4"),
            role: ArtifactRole::TrimmedNormalized,
            range: TrimRange::new(2.0, 10.0),
            rotation,
            source_dimensions: (1080, 1920),
        }
    }

    fn args_for(
        rotation: Rotation,
        config: &PipelineConfig,
        strategy: RotationStrategy,
    ) -> Vec<String> {
        let req = request(rotation);
        build_transcode_args(&req, &partial_path_for(&req.output), config, strategy)
    }

    /// Filter ffmpeg's autorotation inserts for an anticlockwise
    /// `-display_rotation` value (it reads the matrix back as clockwise).
    fn autorotate_filter(display_rotation: u16) -> &'static str {
        match (360 - display_rotation % 360) % 360 {
            90 => "transpose=1",
            180 => "hflip,vflip",
            270 => "transpose=2",
            _ => "",
        }
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|a| a == needle)
            .unwrap_or_else(|| panic!("{} missing from {:?}", needle, args))
    }

    const LEGACY_FILTER: RotationStrategy = RotationStrategy::ExternalFilter {
        override_display_rotation: false,
    };

    #[test]
    fn test_rotated_args_layout() {
        let args = args_for(Rotation::Deg90, &PipelineConfig::default(), LEGACY_FILTER);
        let input = position(&args, "-i");
        assert!(position(&args, "-noautorotate") < input);
        assert!(position(&args, "-ss") > input);
        assert_eq!(args[position(&args, "-ss") + 1], "2.000");
        assert_eq!(args[position(&args, "-to") + 1], "10.000");
        assert_eq!(args[position(&args, "-vf") + 1], "transpose=2");
        assert_eq!(args[position(&args, "-map_metadata") + 1], "-1");
        assert_eq!(args[position(&args, "-metadata:s:v:0") + 1], "rotate=0");
        assert_eq!(args[position(&args, "-c:v") + 1], "libx264");
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "/work/trimmed-normalized-2.partial.mp4"
        );
    }

    #[test]
    fn test_display_rotation_override_on_modern_ffmpeg() {
        let strategy = RotationStrategy::ExternalFilter {
            override_display_rotation: true,
        };
        let args = args_for(Rotation::Deg270, &PipelineConfig::default(), strategy);
        let flag = position(&args, "-display_rotation:v:0");
        assert_eq!(args[flag + 1], "0");
        assert!(flag < position(&args, "-i"));
        assert!(!args.contains(&"-noautorotate".to_string()));
        assert_eq!(args[position(&args, "-vf") + 1], "transpose=1");
    }

    #[test]
    fn test_identity_has_no_filter() {
        let args = args_for(Rotation::Deg0, &PipelineConfig::default(), LEGACY_FILTER);
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.contains(&"rotate=0".to_string()));
    }

    #[test]
    fn test_autorotate_strategy_sets_display_rotation() {
        let config = PipelineConfig::default();
        let args = args_for(Rotation::Deg90, &config, RotationStrategy::Autorotate);
        let flag = position(&args, "-display_rotation:v:0");
        assert_eq!(args[flag + 1], "90");
        assert!(flag < position(&args, "-i"));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(!args.contains(&"-noautorotate".to_string()));
    }

    #[test]
    fn test_strategies_agree_on_every_rotation() {
        let config = PipelineConfig::default();
        for rotation in Rotation::ALL {
            let args = args_for(rotation, &config, RotationStrategy::Autorotate);
            let display: u16 = args[position(&args, "-display_rotation:v:0") + 1]
                .parse()
                .unwrap();
            assert_eq!(
                autorotate_filter(display),
                rotation.transform().filter_spec,
                "rotation {:?}",
                rotation
            );
        }
    }

    #[test]
    fn test_unknown_duration_runs_to_end() {
        let mut req = request(Rotation::Deg0);
        req.range = TrimRange::new(0.0, 0.0);
        let args = build_transcode_args(
            &req,
            Path::new("out.mp4"),
            &PipelineConfig::default(),
            LEGACY_FILTER,
        );
        assert_eq!(args[position(&args, "-ss") + 1], "0.000");
        assert!(!args.contains(&"-to".to_string()));
    }

    #[test]
    fn test_keep_audio() {
        let config = PipelineConfig {
            keep_audio: true,
            ..Default::default()
        };
        let args = args_for(Rotation::Deg0, &config, LEGACY_FILTER);
        assert!(!args.contains(&"-an".to_string()));
        assert!(args.contains(&"0:a:0?".to_string()));
        assert_eq!(args[position(&args, "-c:a") + 1], "aac");
    }

    #[test]
    fn test_dash_prefixed_input_is_escaped() {
        let mut req = request(Rotation::Deg0);
        req.input = PathBuf::from("-clip.mov");
        let args = build_transcode_args(
            &req,
            Path::new("out.mp4"),
            &PipelineConfig::default(),
            LEGACY_FILTER,
        );
        assert_eq!(args[position(&args, "-i") + 1], "./-clip.mov");
    }

    #[test]
    fn test_expected_dimensions() {
        assert_eq!(request(Rotation::Deg90).expected_dimensions(), (1920, 1080));
        assert_eq!(request(Rotation::Deg180).expected_dimensions(), (1080, 1920));
    }

    #[test]
    fn test_strategy_selection() {
        let tools = ExternalTools {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg_major: Some(7),
        };
        assert_eq!(
            RotationStrategy::select(&PipelineConfig::default(), &tools),
            RotationStrategy::ExternalFilter {
                override_display_rotation: true
            }
        );
        let config = PipelineConfig {
            use_external_rotate_filter: false,
            ..Default::default()
        };
        assert_eq!(
            RotationStrategy::select(&config, &tools),
            RotationStrategy::Autorotate
        );

        let legacy = ExternalTools {
            ffmpeg_major: Some(6),
            ..tools
        };
        assert_eq!(RotationStrategy::select(&config, &legacy), LEGACY_FILTER);
    }
}
