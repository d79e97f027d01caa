//! Pipeline Orchestrator: execution half
//!
//! A [`PipelinePlan`] is an owned description of one operation (output
//! paths already allocated by the session). Running it needs only a
//! [`PipelineContext`], so plans can move to a worker thread while the
//! session stays on the caller's side.
//!
//! ```text
//! Prober ──► Resolver ──► Trim-Transcode ──► Downscale + GIF
//!  (session)   (plan)        (all plans)       (export only)
//! ```

use crate::animated_image::{render_animated_image, GifSettings, RenderedGif};
use crate::artifact::PipelineArtifact;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::transcode::{transcode, TranscodeRequest};
use serde::Serialize;
use shared_utils::{CancellationToken, ExternalTools, ProgressCallback};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

pub const GIF_FILE_NAME: &str = "converted.gif";
pub const GIF_MIME_TYPE: &str = "image/gif";

/// Everything a plan needs to run.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub tools: ExternalTools,
    pub token: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("cancelled", &self.token.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl PipelineContext {
    pub fn new(config: PipelineConfig, tools: ExternalTools) -> Self {
        Self {
            config,
            tools,
            token: CancellationToken::new(),
            progress: None,
        }
    }

    /// Validate `config` and resolve the tools it names.
    pub fn detect(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let tools = ExternalTools::detect(&config.tools.ffmpeg, &config.tools.ffprobe)
            .map_err(|e| PipelineError::ToolNotFound(e.to_string()))?;
        Ok(Self::new(config, tools))
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn gif_settings(&self) -> GifSettings {
        GifSettings {
            max_width: self.config.max_width,
            target_fps: self.config.target_fps,
            max_colors: self.config.max_colors,
        }
    }
}

/// Final GIF plus what a download sink needs to serve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GifDownload {
    pub artifact: PipelineArtifact,
    pub file_name: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl GifDownload {
    fn from_rendered(rendered: RenderedGif) -> Self {
        Self {
            artifact: rendered.artifact,
            file_name: GIF_FILE_NAME.to_string(),
            mime_type: GIF_MIME_TYPE,
            width: rendered.width,
            height: rendered.height,
        }
    }

    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.artifact.path)
    }
}

/// Which branch of the state machine a plan belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    OrientedPreview,
    Subclip,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::OrientedPreview => "oriented preview",
            Operation::Subclip => "subclip preview",
            Operation::Export => "GIF export",
        })
    }
}

/// Session generation a plan was created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanTicket {
    pub input_epoch: u64,
    /// `None` for plans that do not depend on the trim selection.
    pub selection_epoch: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum PlanSteps {
    /// Transcode only.
    Clip(TranscodeRequest),
    /// Transcode, then encode the intermediate clip into `gif_output`.
    Gif {
        transcode: TranscodeRequest,
        gif_output: PathBuf,
        settings: GifSettings,
    },
}

#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub operation: Operation,
    pub ticket: PlanTicket,
    pub steps: PlanSteps,
}

/// Result of a successful plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutput {
    Clip(PipelineArtifact),
    Gif(GifDownload),
}

impl PipelineOutput {
    pub fn artifact(&self) -> &PipelineArtifact {
        match self {
            PipelineOutput::Clip(a) => a,
            PipelineOutput::Gif(g) => &g.artifact,
        }
    }

    /// Delete the files behind this output.
    pub fn discard(&self) {
        self.artifact().discard();
    }
}

impl PipelinePlan {
    /// Every path this plan may write, for cleanup by the owner.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        match &self.steps {
            PlanSteps::Clip(req) => vec![req.output.clone()],
            PlanSteps::Gif {
                transcode,
                gif_output,
                ..
            } => vec![transcode.output.clone(), gif_output.clone()],
        }
    }

    /// Execute the plan synchronously.
    ///
    /// On failure nothing the plan wrote is left behind; the intermediate
    /// clip of an export is removed in every case.
    pub fn run(&self, ctx: &PipelineContext) -> Result<PipelineOutput> {
        info!(operation = %self.operation, "Running pipeline");
        match &self.steps {
            PlanSteps::Clip(req) => transcode(ctx, req).map(PipelineOutput::Clip),
            PlanSteps::Gif {
                transcode: req,
                gif_output,
                settings,
            } => {
                let intermediate = transcode(ctx, req)?;
                let rendered = render_animated_image(ctx, &intermediate.path, gif_output, settings);
                intermediate.discard();
                let rendered = rendered?;
                if ctx.token.is_cancelled() {
                    warn!("Export finished after cancellation, discarding GIF");
                    rendered.artifact.discard();
                    return Err(PipelineError::Cancelled);
                }
                Ok(PipelineOutput::Gif(GifDownload::from_rendered(rendered)))
            }
        }
    }
}
