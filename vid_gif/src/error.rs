//! Error taxonomy for the trim/export pipeline
//!
//! - `ValidationError`: bad upload or trim selection. Raised before any
//!   external process runs and shown to the user verbatim.
//! - `PipelineError`: everything else, including wrapped validation errors.
//!   External tool failures carry the condensed stderr for the log but are
//!   shown to the user as a generic message.

use shared_utils::{get_error_suggestion, FFprobeError, FileSize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("File is too large ({size}); the limit is {limit}")]
    FileTooLarge { size: FileSize, limit: FileSize },

    #[error("Unsupported file type '{0}'")]
    UnsupportedExtension(String),

    #[error("End time ({end:.2}s) must not be before start time ({start:.2}s)")]
    EndBeforeStart { start: f64, end: f64 },

    #[error("Start and end are both {at:.2}s; select a range longer than zero")]
    EmptyRange { at: f64 },

    #[error("Selected range is {length:.2}s; the maximum is {max:.0}s")]
    RangeTooLong { length: f64, max: f64 },

    #[error("Range {start:.2}s..{end:.2}s lies outside the clip (0s..{duration:.2}s)")]
    OutOfBounds { start: f64, end: f64, duration: f64 },

    #[error("Start and end times must be finite numbers")]
    NotFinite,

    #[error("No video has been uploaded")]
    NoInput,

    #[error("Select a time range first")]
    NoRangeSelected,
}

/// How the caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The session stays usable; the user can fix the input and retry.
    Recoverable,
    /// The environment is broken (missing tool, bad config, disk errors).
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Recoverable => write!(f, "RECOVERABLE"),
            ErrorCategory::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Transcode failed: {message}")]
    Transcode {
        message: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("GIF encode failed: {message}")]
    Encode {
        message: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Unsupported rotation: {0} degrees")]
    UnsupportedRotation(i64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn probe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Probe {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn transcode(message: impl Into<String>) -> Self {
        PipelineError::Transcode {
            message: message.into(),
            stderr: String::new(),
            exit_code: None,
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        PipelineError::Encode {
            message: message.into(),
            stderr: String::new(),
            exit_code: None,
        }
    }

    pub fn from_ffprobe(path: impl Into<PathBuf>, err: FFprobeError) -> Self {
        match err {
            FFprobeError::Cancelled => PipelineError::Cancelled,
            FFprobeError::ToolNotFound(name) => PipelineError::ToolNotFound(name),
            other => PipelineError::probe(path, other.to_string()),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Validation(_)
            | PipelineError::Probe { .. }
            | PipelineError::Transcode { .. }
            | PipelineError::Encode { .. }
            | PipelineError::UnsupportedRotation(_)
            | PipelineError::Cancelled => ErrorCategory::Recoverable,

            PipelineError::ToolNotFound(_) | PipelineError::Config(_) | PipelineError::Io(_) => {
                ErrorCategory::Fatal
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }

    /// Text for the person at the other end of the upload widget.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Validation(v) => v.to_string(),
            PipelineError::Probe { .. } => {
                "Could not read this video. Please try a different file.".to_string()
            }
            PipelineError::Transcode { .. } | PipelineError::Encode { .. } => {
                "Video processing failed. Please try again or choose a different range."
                    .to_string()
            }
            PipelineError::UnsupportedRotation(deg) => format!(
                "This video has an unsupported orientation ({} degrees).",
                deg
            ),
            PipelineError::Cancelled => "Operation cancelled.".to_string(),
            PipelineError::ToolNotFound(_) => {
                "Video tools are not installed on this server.".to_string()
            }
            PipelineError::Config(_) | PipelineError::Io(_) => {
                "An internal error occurred.".to_string()
            }
        }
    }

    /// Actionable hint derived from captured tool stderr, if any.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            PipelineError::Transcode { stderr, .. } | PipelineError::Encode { stderr, .. } => {
                get_error_suggestion(stderr)
            }
            PipelineError::Probe { message, .. } => get_error_suggestion(message),
            _ => None,
        }
    }
}
