//! Shared utilities for the vid_gif tools
//!
//! - External process supervision (timeouts, cancellation, progress parsing)
//! - FFprobe JSON probing
//! - External tool discovery and ffmpeg version detection
//! - Logging setup and external tool logging
//! - Progress spinner
//! - Type-safe byte sizes

pub mod cancel;
pub mod ffmpeg_process;
pub mod ffprobe;
pub mod logging;
pub mod progress;
pub mod tools;
pub mod types;

pub use cancel::CancellationToken;
pub use ffmpeg_process::{
    format_ffmpeg_error, get_error_suggestion, run_tool, FfmpegProcess, FfmpegProgressParser,
    ProcessOutcome, ProgressCallback, ProgressSink, RunLimits,
};
pub use ffprobe::{
    parse_frame_rate, parse_probe_output, probe_json, FFprobeError, FfprobeFormat, FfprobeOutput,
    FfprobeStream, SideData,
};
pub use logging::{init_logging, log_external_tool, log_operation_end, LogConfig};
pub use progress::{create_spinner, set_fraction};
pub use tools::{parse_ffmpeg_major_version, safe_path_arg, ExternalTools, MissingTool};
pub use types::FileSize;
