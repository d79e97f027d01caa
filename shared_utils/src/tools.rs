//! External tool discovery
//!
//! Resolves the ffmpeg/ffprobe binaries once per run and records the ffmpeg
//! major version, which decides how input autorotation is disabled.

use crate::ffmpeg_process::{run_tool, ProcessOutcome, RunLimits};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("{tool} not found ({name}); install ffmpeg or set its path in the config")]
pub struct MissingTool {
    pub tool: &'static str,
    pub name: String,
}

/// Resolved binaries.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// `None` for git snapshots and unrecognised version banners.
    pub ffmpeg_major: Option<u32>,
}

impl ExternalTools {
    /// Resolve both tools via `PATH` (or take explicit paths as given) and
    /// query the ffmpeg version.
    pub fn detect(ffmpeg: &Path, ffprobe: &Path) -> Result<Self, MissingTool> {
        let ffmpeg = resolve(ffmpeg, "ffmpeg")?;
        let ffprobe = resolve(ffprobe, "ffprobe")?;
        let ffmpeg_major = query_ffmpeg_major(&ffmpeg);
        info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            ffmpeg_major = ?ffmpeg_major,
            "External tools resolved"
        );
        Ok(Self {
            ffmpeg,
            ffprobe,
            ffmpeg_major,
        })
    }

    /// ffmpeg 7 copies the display matrix into the output even with
    /// `-noautorotate`; from 7 on the input-side `-display_rotation` override
    /// is used instead.
    pub fn supports_display_rotation_override(&self) -> bool {
        self.ffmpeg_major.is_some_and(|major| major >= 7)
    }
}

fn resolve(candidate: &Path, tool: &'static str) -> Result<PathBuf, MissingTool> {
    let missing = || MissingTool {
        tool,
        name: candidate.display().to_string(),
    };
    if candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(missing())
        };
    }
    which::which(candidate).map_err(|e| {
        debug!(tool, error = %e, "which lookup failed");
        missing()
    })
}

fn query_ffmpeg_major(ffmpeg: &Path) -> Option<u32> {
    let args = vec!["-hide_banner".to_string(), "-version".to_string()];
    match run_tool(ffmpeg, &args, &RunLimits::new(VERSION_QUERY_TIMEOUT), None) {
        Ok(ProcessOutcome::Completed { status, stdout, .. }) if status.success() => {
            stdout.lines().next().and_then(parse_ffmpeg_major_version)
        }
        Ok(other) => {
            warn!(outcome = ?other, "ffmpeg -version did not complete");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to query ffmpeg version");
            None
        }
    }
}

/// Parse the major version out of an `ffmpeg version ...` banner line.
///
/// Accepts `6.1.1`, `n7.1`, `7.0.2-static` style versions; returns `None`
/// for git builds such as `N-113145-g1a2b3c`.
pub fn parse_ffmpeg_major_version(banner: &str) -> Option<u32> {
    let mut words = banner.split_whitespace();
    words.find(|w| *w == "version")?;
    let version = words.next()?;
    let version = version.strip_prefix('n').unwrap_or(version);
    let digits: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Render a path for use as a tool argument. Relative paths starting with
/// `-` get a `./` prefix so they are not parsed as options.
pub fn safe_path_arg(path: &Path) -> Cow<'_, str> {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        Cow::Owned(format!("./{}", s))
    } else {
        s
    }
}
