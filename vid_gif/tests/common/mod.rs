//! Shell-script stand-ins for ffmpeg and ffprobe.
//!
//! The fake ffprobe prints the file it is pointed at, so every "video" in
//! these tests is the ffprobe JSON describing it. The fake ffmpeg logs its
//! arguments and writes a file matching the extension of its last argument:
//! clip JSON for `.mp4`, a stub PNG for the palette and a GIF header.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;
use vid_gif::{PipelineConfig, PipelineContext, ToolPaths};

static SERIAL: Mutex<()> = Mutex::new(());

/// Tests that write and execute scripts must not overlap, or a fork in one
/// test can inherit another's open write handle (ETXTBSY).
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy)]
pub enum EncoderMode {
    Normal,
    /// Every encode exits 1 after writing half a file.
    Failing,
    /// MP4 encodes succeed; palette and GIF encodes fail like `Failing`.
    FailingGif,
    /// Encodes block until killed. The shell forks `sleep`, so the
    /// grandchild holds the output pipes too.
    Hanging,
}

pub struct FakeTools {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    ffmpeg_log: PathBuf,
    ffprobe_log: PathBuf,
}

impl FakeTools {
    /// `clip_json` is what every MP4 written by the fake ffmpeg contains.
    pub fn new(clip_json: &str, mode: EncoderMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join("ffmpeg");
        let ffprobe = dir.path().join("ffprobe");
        let ffmpeg_log = dir.path().join("ffmpeg.log");
        let ffprobe_log = dir.path().join("ffprobe.log");
        let clip = dir.path().join("clip.json");
        std::fs::write(&clip, clip_json).unwrap();

        let encode = match mode {
            EncoderMode::Normal => format!(
                r#"case "$last" in
  *.mp4) cat "{clip}" > "$last" ;;
  *.png) printf 'PNG' > "$last" ;;
  *.gif) printf 'GIF89a' > "$last" ;;
esac
echo "out_time_us=500000"
echo "progress=continue"
echo "out_time_us=1000000"
echo "progress=end"
exit 0"#,
                clip = clip.display()
            ),
            EncoderMode::Failing => r#"printf 'half' > "$last"
echo "Error while opening encoder for output stream #0:0" >&2
exit 1"#
                .to_string(),
            EncoderMode::FailingGif => format!(
                r#"case "$last" in
  *.mp4) cat "{clip}" > "$last"; exit 0 ;;
esac
printf 'half' > "$last"
echo "Error initializing filter 'palettegen'" >&2
exit 1"#,
                clip = clip.display()
            ),
            EncoderMode::Hanging => "sleep 30\nexit 0".to_string(),
        };

        let ffmpeg_script = format!(
            r#"#!/bin/sh
if [ "$2" = "-version" ]; then
  echo "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers"
  exit 0
fi
echo "$*" >> "{log}"
for last; do :; done
{encode}
"#,
            log = ffmpeg_log.display(),
            encode = encode
        );
        let ffprobe_script = format!(
            r#"#!/bin/sh
echo "$*" >> "{log}"
for last; do :; done
cat "$last"
"#,
            log = ffprobe_log.display()
        );
        write_script(&ffmpeg, &ffmpeg_script);
        write_script(&ffprobe, &ffprobe_script);

        Self {
            dir,
            ffmpeg,
            ffprobe,
            ffmpeg_log,
            ffprobe_log,
        }
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            tools: ToolPaths {
                ffmpeg: self.ffmpeg.clone(),
                ffprobe: self.ffprobe.clone(),
            },
            work_dir: Some(self.dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    pub fn context(&self) -> PipelineContext {
        PipelineContext::detect(self.config()).unwrap()
    }

    /// One entry per encode invocation (version queries excluded).
    pub fn ffmpeg_calls(&self) -> Vec<String> {
        read_lines(&self.ffmpeg_log)
    }

    pub fn ffprobe_calls(&self) -> Vec<String> {
        read_lines(&self.ffprobe_log)
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// ffprobe JSON for a single video stream.
pub fn video_json(width: u32, height: u32, rotate: Option<i32>, duration: f64) -> String {
    let mut stream = serde_json::json!({
        "index": 0,
        "codec_type": "video",
        "codec_name": "h264",
        "width": width,
        "height": height,
        "r_frame_rate": "30/1",
        "avg_frame_rate": "30/1",
        "duration": format!("{:.6}", duration),
    });
    if let Some(deg) = rotate {
        stream["tags"] = serde_json::json!({ "rotate": deg.to_string() });
    }
    serde_json::json!({
        "streams": [stream],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": format!("{:.6}", duration),
            "tags": {
                "com.apple.quicktime.make": "Apple",
                "com.apple.quicktime.model": "iPhone 12"
            }
        }
    })
    .to_string()
}

/// Every file left in the session scratch directories under `root`.
pub fn scratch_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(root).unwrap().flatten() {
        let path = entry.path();
        if path.is_dir() {
            for inner in std::fs::read_dir(&path).unwrap().flatten() {
                files.push(inner.path());
            }
        }
    }
    files
}

pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(".partial"))
        .unwrap_or(false)
}
