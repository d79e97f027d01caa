//! Background execution of pipeline plans
//!
//! A plan runs on its own worker thread so a UI event loop never waits on
//! ffmpeg. Cancelling the handle kills the running tool; a result that
//! arrives after cancellation is deleted rather than returned.

use crate::error::{PipelineError, Result};
use crate::pipeline::{Operation, PipelineContext, PipelineOutput, PipelinePlan};
use shared_utils::CancellationToken;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub struct JobHandle {
    operation: Operation,
    token: CancellationToken,
    worker: JoinHandle<Result<PipelineOutput>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("operation", &self.operation)
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.worker.is_finished())
            .finish()
    }
}

/// Run `plan` on a worker thread using `ctx`'s cancellation token.
pub fn spawn_job(plan: PipelinePlan, ctx: PipelineContext) -> Result<JobHandle> {
    let operation = plan.operation;
    let token = ctx.token.clone();
    let worker = thread::Builder::new()
        .name(format!("vid_gif-{:?}", operation).to_lowercase())
        .spawn(move || plan.run(&ctx))?;
    debug!(operation = %operation, "Job started");
    Ok(JobHandle {
        operation,
        token,
        worker,
    })
}

impl JobHandle {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Request cancellation; the running tool is killed at its next poll.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker.
    pub fn join(self) -> Result<PipelineOutput> {
        let result = match self.worker.join() {
            Ok(result) => result,
            Err(_) => {
                error!(operation = %self.operation, "Pipeline worker panicked");
                return Err(PipelineError::transcode("pipeline worker panicked"));
            }
        };
        match result {
            Ok(output) if self.token.is_cancelled() => {
                debug!(operation = %self.operation, "Discarding output of cancelled job");
                output.discard();
                Err(PipelineError::Cancelled)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRole;
    use crate::config::PipelineConfig;
    use crate::orientation::Rotation;
    use crate::pipeline::{PlanSteps, PlanTicket};
    use crate::transcode::TranscodeRequest;
    use crate::trim::TrimRange;
    use shared_utils::ExternalTools;
    use std::path::PathBuf;

    fn plan(dir: &std::path::Path) -> PipelinePlan {
        PipelinePlan {
            operation: Operation::Subclip,
            ticket: PlanTicket {
                input_epoch: 0,
                selection_epoch: Some(0),
            },
            steps: PlanSteps::Clip(TranscodeRequest {
                input: dir.join("upload-1.mp4"),
                output: dir.join("trimmed-normalized-2.mp4"),
                role: ArtifactRole::TrimmedNormalized,
                range: TrimRange::new(0.0, 2.0),
                rotation: Rotation::Deg0,
                source_dimensions: (320, 240),
            }),
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            PipelineConfig::default(),
            ExternalTools {
                ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
                ffprobe: PathBuf::from("/nonexistent/ffprobe"),
                ffmpeg_major: None,
            },
        )
    }

    #[test]
    fn test_job_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("upload-1.mp4"), b"x").unwrap();
        let handle = spawn_job(plan(dir.path()), ctx()).unwrap();
        assert_eq!(handle.operation(), Operation::Subclip);
        assert!(matches!(handle.join(), Err(PipelineError::Transcode { .. })));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        ctx.token.cancel();
        let handle = spawn_job(plan(dir.path()), ctx).unwrap();
        assert!(matches!(handle.join(), Err(PipelineError::Cancelled)));
    }
}
