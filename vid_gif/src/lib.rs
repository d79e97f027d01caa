//! vid-gif - Orientation-aware video trim and GIF export
//!
//! Probes an uploaded clip, undoes its display rotation, cuts a bounded
//! time window in a single ffmpeg pass and renders a downsized palette GIF.
//!
//! ## Usage
//! ```rust,ignore
//! use vid_gif::{PipelineConfig, PipelineContext, Session, TrimRange, Upload};
//!
//! let ctx = PipelineContext::detect(PipelineConfig::default())?;
//! let mut session = Session::new(ctx.config.clone())?;
//! let upload = Upload::from_path(Path::new("IMG_0420.MOV"), ctx.config.max_upload_size())?;
//! session.load(&ctx, upload)?;
//! session.select_range(TrimRange::new(2.0, 10.0))?;
//! let plan = session.plan_export(&ctx)?;
//! let result = plan.run(&ctx);
//! let exported = session.complete(&plan, result)?;
//! ```

pub mod animated_image;
pub mod artifact;
pub mod config;
pub mod error;
pub mod input_lock;
pub mod job;
pub mod orientation;
pub mod pipeline;
pub mod probe;
pub mod session;
pub mod transcode;
pub mod trim;

// Re-exports
pub use animated_image::{render_animated_image, target_dimensions, GifSettings, RenderedGif};
pub use artifact::{ArtifactRole, ArtifactStore, PipelineArtifact};
pub use config::{PipelineConfig, ToolPaths};
pub use error::{ErrorCategory, PipelineError, Result, ValidationError};
pub use job::{spawn_job, JobHandle};
pub use orientation::{resolve, OrientationTransform, Rotation, RotationPolicy};
pub use pipeline::{
    GifDownload, Operation, PipelineContext, PipelineOutput, PipelinePlan, GIF_FILE_NAME,
    GIF_MIME_TYPE,
};
pub use probe::{probe, MediaDescriptor};
pub use session::{Session, SessionState, Upload};
pub use transcode::{build_transcode_args, transcode, RotationStrategy, TranscodeRequest};
pub use trim::TrimRange;
