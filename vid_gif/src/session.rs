//! Pipeline Orchestrator: per-user session state machine
//!
//! ```text
//! Idle ──load──► Probed ──select_range──► Validated ──┬─► PreviewRendered
//!   ▲                                                 ├─► SubclipPreviewed
//!   └────────────── clear / load (replace) ◄──────────┴─► Exported
//! ```
//!
//! The session owns the uploaded file, the probe result, the trim selection
//! and every artifact created for them. Expensive work happens in
//! [`PipelinePlan::run`]; the session only hands out plans and records
//! their results, so it never blocks on an external process itself.

use crate::artifact::{ArtifactRole, ArtifactStore};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, ValidationError};
use crate::pipeline::{
    GifDownload, Operation, PipelineContext, PipelineOutput, PipelinePlan, PlanSteps, PlanTicket,
};
use crate::probe::{probe, MediaDescriptor};
use crate::transcode::TranscodeRequest;
use crate::trim::TrimRange;
use shared_utils::{FileSize, RunLimits};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Probed,
    Validated,
    PreviewRendered,
    SubclipPreviewed,
    Exported,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Probed => "probed",
            SessionState::Validated => "validated",
            SessionState::PreviewRendered => "preview-rendered",
            SessionState::SubclipPreviewed => "subclip-previewed",
            SessionState::Exported => "exported",
        })
    }
}

/// Raw upload as received from the upload widget.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Size claimed by the client, checked before anything else.
    pub declared_size: u64,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let declared_size = bytes.len() as u64;
        Self {
            file_name: file_name.into(),
            bytes,
            declared_size,
        }
    }

    /// Read a local file as an upload.
    ///
    /// The on-disk size is checked against `limit` before any byte is read,
    /// and reading stops one byte past the limit in case the file grows.
    pub fn from_path(path: &Path, limit: FileSize) -> Result<Self> {
        let declared_size = std::fs::metadata(path)?.len();
        let size = FileSize::new(declared_size);
        if size.exceeds(limit) {
            return Err(ValidationError::FileTooLarge { size, limit }.into());
        }

        let mut bytes = Vec::new();
        File::open(path)?
            .take(limit.bytes().saturating_add(1))
            .read_to_end(&mut bytes)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            file_name,
            bytes,
            declared_size,
        })
    }

    fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct LoadedInput {
    path: PathBuf,
    file_name: String,
    descriptor: MediaDescriptor,
}

pub struct Session {
    config: PipelineConfig,
    store: ArtifactStore,
    state: SessionState,
    input: Option<LoadedInput>,
    selection: Option<TrimRange>,
    input_epoch: u64,
    selection_epoch: u64,
    probe_cache: HashMap<blake3::Hash, MediaDescriptor>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("input", &self.input.as_ref().map(|i| &i.file_name))
            .field("selection", &self.selection)
            .field("artifact_dir", &self.store.dir())
            .finish()
    }
}

impl Session {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::new(config.work_dir.as_deref())?;
        Ok(Self {
            config,
            store,
            state: SessionState::Idle,
            input: None,
            selection: None,
            input_epoch: 0,
            selection_epoch: 0,
            probe_cache: HashMap::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> Option<&MediaDescriptor> {
        self.input.as_ref().map(|i| &i.descriptor)
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_ref().map(|i| i.path.as_path())
    }

    pub fn selection(&self) -> Option<TrimRange> {
        self.selection
    }

    pub fn artifact_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Files currently owned by the session (upload included).
    pub fn tracked_artifacts(&self) -> usize {
        self.store.tracked()
    }

    /// Initial slider position for the current input.
    pub fn default_range(&self) -> Option<TrimRange> {
        self.descriptor()
            .map(|d| TrimRange::default_for(d.duration_seconds, self.config.max_clip_seconds))
    }

    /// Check an upload against the size ceiling and accepted extensions.
    /// Runs before any byte is written or any tool is started.
    pub fn validate_upload(&self, upload: &Upload) -> std::result::Result<(), ValidationError> {
        let limit = self.config.max_upload_size();
        for size in [upload.declared_size, upload.bytes.len() as u64] {
            let size = FileSize::new(size);
            if size.exceeds(limit) {
                return Err(ValidationError::FileTooLarge { size, limit });
            }
        }
        if !self.config.accepts_extension(&upload.file_name) {
            return Err(ValidationError::UnsupportedExtension(upload.extension()));
        }
        Ok(())
    }

    /// `Idle → Probed`. Replaces (and cleans up after) any previous input.
    ///
    /// A rejected upload leaves the session untouched. Identical bytes are
    /// probed only once per session.
    pub fn load(&mut self, ctx: &PipelineContext, upload: Upload) -> Result<&MediaDescriptor> {
        self.validate_upload(&upload)?;
        self.clear();

        let digest = blake3::hash(&upload.bytes);
        let path = self.store.allocate(ArtifactRole::Upload, &upload.extension());
        std::fs::write(&path, &upload.bytes)?;

        let descriptor = match self.probe_cache.get(&digest) {
            Some(cached) => {
                debug!(file = %upload.file_name, digest = %digest.to_hex(), "Probe cache hit");
                cached.clone()
            }
            None => {
                let limits =
                    RunLimits::new(self.config.probe_timeout()).with_token(ctx.token.clone());
                match probe(&ctx.tools.ffprobe, &path, self.config.rotation_policy, &limits) {
                    Ok(d) => {
                        self.probe_cache.insert(digest, d.clone());
                        d
                    }
                    Err(e) => {
                        self.store.release(&path);
                        return Err(e);
                    }
                }
            }
        };

        info!(
            file = %upload.file_name,
            size = %FileSize::new(upload.bytes.len() as u64),
            duration = descriptor.duration_seconds,
            rotation = descriptor.rotation.degrees(),
            "Input loaded"
        );
        self.state = SessionState::Probed;
        let input = self.input.insert(LoadedInput {
            path,
            file_name: upload.file_name,
            descriptor,
        });
        Ok(&input.descriptor)
    }

    /// `Probed → Validated`. On failure the selection is dropped and the
    /// session falls back to `Probed`.
    pub fn select_range(&mut self, range: TrimRange) -> Result<()> {
        let duration = self
            .descriptor()
            .map(|d| d.duration_seconds)
            .ok_or(ValidationError::NoInput)?;
        self.selection_epoch += 1;
        match range.validate(duration, self.config.max_clip_seconds) {
            Ok(()) => {
                debug!(start = range.start, end = range.end, "Trim range selected");
                self.selection = Some(range);
                self.state = SessionState::Validated;
                Ok(())
            }
            Err(e) => {
                self.selection = None;
                self.state = SessionState::Probed;
                Err(e.into())
            }
        }
    }

    /// Plan the full-clip orientation preview. Needs a probed input; a trim
    /// selection is not required.
    pub fn plan_preview(&mut self) -> Result<PipelinePlan> {
        let (input, descriptor) = self.loaded()?;
        let request = TranscodeRequest {
            input,
            output: self.store.allocate(ArtifactRole::OrientedPreview, "mp4"),
            role: ArtifactRole::OrientedPreview,
            range: TrimRange::full(descriptor.duration_seconds),
            rotation: descriptor.rotation,
            source_dimensions: (descriptor.width, descriptor.height),
        };
        Ok(PipelinePlan {
            operation: Operation::OrientedPreview,
            ticket: PlanTicket {
                input_epoch: self.input_epoch,
                selection_epoch: None,
            },
            steps: PlanSteps::Clip(request),
        })
    }

    /// Plan the trimmed, normalized MP4 of the selected range.
    pub fn plan_subclip(&mut self) -> Result<PipelinePlan> {
        let request = self.trimmed_request()?;
        Ok(PipelinePlan {
            operation: Operation::Subclip,
            ticket: self.selection_ticket(),
            steps: PlanSteps::Clip(request),
        })
    }

    /// Plan the GIF export of the selected range.
    pub fn plan_export(&mut self, ctx: &PipelineContext) -> Result<PipelinePlan> {
        let transcode = self.trimmed_request()?;
        let gif_output = self.store.allocate(ArtifactRole::GifOutput, "gif");
        Ok(PipelinePlan {
            operation: Operation::Export,
            ticket: self.selection_ticket(),
            steps: PlanSteps::Gif {
                transcode,
                gif_output,
                settings: ctx.gif_settings(),
            },
        })
    }

    /// Record the result of running `plan`.
    ///
    /// Results of plans made before the input or the selection changed are
    /// deleted and reported as cancelled. Failures delete whatever the plan
    /// may have written and leave the state where it was.
    pub fn complete(
        &mut self,
        plan: &PipelinePlan,
        result: Result<PipelineOutput>,
    ) -> Result<PipelineOutput> {
        if !self.is_current(&plan.ticket) {
            warn!(operation = %plan.operation, "Discarding result of a superseded plan");
            if let Ok(output) = &result {
                output.discard();
            }
            self.release_plan(plan);
            return Err(PipelineError::Cancelled);
        }

        match result {
            Ok(output) => {
                self.state = match plan.operation {
                    Operation::OrientedPreview => SessionState::PreviewRendered,
                    Operation::Subclip => SessionState::SubclipPreviewed,
                    Operation::Export => SessionState::Exported,
                };
                info!(operation = %plan.operation, state = %self.state, "Operation complete");
                Ok(output)
            }
            Err(e) => {
                warn!(operation = %plan.operation, error = %e, "Operation failed");
                self.release_plan(plan);
                Err(e)
            }
        }
    }

    /// `→ PreviewRendered`, synchronously.
    pub fn run_preview(&mut self, ctx: &PipelineContext) -> Result<PipelineOutput> {
        let plan = self.plan_preview()?;
        let result = plan.run(ctx);
        self.complete(&plan, result)
    }

    /// `Validated → SubclipPreviewed`, synchronously.
    pub fn run_subclip(&mut self, ctx: &PipelineContext) -> Result<PipelineOutput> {
        let plan = self.plan_subclip()?;
        let result = plan.run(ctx);
        self.complete(&plan, result)
    }

    /// `Validated → Exported`, synchronously.
    pub fn run_export(&mut self, ctx: &PipelineContext) -> Result<GifDownload> {
        let plan = self.plan_export(ctx)?;
        let result = plan.run(ctx);
        match self.complete(&plan, result)? {
            PipelineOutput::Gif(download) => Ok(download),
            PipelineOutput::Clip(artifact) => {
                artifact.discard();
                Err(PipelineError::encode("export produced no GIF"))
            }
        }
    }

    /// Back to `Idle`; every artifact of the session is deleted.
    pub fn clear(&mut self) {
        if self.input.is_some() || self.store.tracked() > 0 {
            debug!(state = %self.state, "Clearing session");
        }
        self.store.purge();
        self.input = None;
        self.selection = None;
        self.input_epoch += 1;
        self.selection_epoch += 1;
        self.state = SessionState::Idle;
    }

    fn loaded(&self) -> Result<(PathBuf, MediaDescriptor)> {
        self.input
            .as_ref()
            .map(|i| (i.path.clone(), i.descriptor.clone()))
            .ok_or_else(|| ValidationError::NoInput.into())
    }

    fn trimmed_request(&mut self) -> Result<TranscodeRequest> {
        let (input, descriptor) = self.loaded()?;
        let range = self.selection.ok_or(ValidationError::NoRangeSelected)?;
        Ok(TranscodeRequest {
            input,
            output: self.store.allocate(ArtifactRole::TrimmedNormalized, "mp4"),
            role: ArtifactRole::TrimmedNormalized,
            range,
            rotation: descriptor.rotation,
            source_dimensions: (descriptor.width, descriptor.height),
        })
    }

    fn selection_ticket(&self) -> PlanTicket {
        PlanTicket {
            input_epoch: self.input_epoch,
            selection_epoch: Some(self.selection_epoch),
        }
    }

    fn is_current(&self, ticket: &PlanTicket) -> bool {
        ticket.input_epoch == self.input_epoch
            && ticket
                .selection_epoch
                .map_or(true, |epoch| epoch == self.selection_epoch)
    }

    fn release_plan(&mut self, plan: &PipelinePlan) {
        for path in plan.output_paths() {
            self.store.release(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::ExternalTools;

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
    fn test_new_session_is_idle() {
        let session = Session::new(PipelineConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.descriptor().is_none());
        assert!(session.default_range().is_none());
    }

    #[test]
    fn test_operations_without_input_are_validation_errors() {
        let mut session = Session::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            session.select_range(TrimRange::new(0.0, 1.0)),
            Err(PipelineError::Validation(ValidationError::NoInput))
        ));
        assert!(matches!(
            session.plan_preview(),
            Err(PipelineError::Validation(ValidationError::NoInput))
        ));
        assert!(matches!(
            session.plan_export(&ctx()),
            Err(PipelineError::Validation(ValidationError::NoInput))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_upload_validation_order() {
        let session = Session::new(PipelineConfig::default()).unwrap();
        let mut upload = Upload::new("clip.mp4", vec![0; 16]);
        upload.declared_size = 101 * FileSize::MB;
        assert!(matches!(
            session.validate_upload(&upload),
            Err(ValidationError::FileTooLarge { .. })
        ));

        let upload = Upload::new("notes.txt", vec![0; 16]);
        assert_eq!(
            session.validate_upload(&upload),
            Err(ValidationError::UnsupportedExtension("txt".into()))
        );

        let upload = Upload::new("IMG_0001.MOV", vec![0; 16]);
        assert!(session.validate_upload(&upload).is_ok());
    }

    #[test]
    fn test_actual_size_checked_even_when_declared_small() {
        let config = PipelineConfig {
            max_upload_bytes: 8,
            ..Default::default()
        };
        let session = Session::new(config).unwrap();
        let mut upload = Upload::new("clip.mp4", vec![0; 9]);
        upload.declared_size = 1;
        assert!(matches!(
            session.validate_upload(&upload),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_file_is_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0007.MOV");
        // sparse, so the test never allocates the bytes
        let file = File::create(&path).unwrap();
        file.set_len(4 * FileSize::GB).unwrap();

        let err = Upload::from_path(&path, FileSize::from_mb(1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_upload_from_path_reads_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0008.MOV");
        std::fs::write(&path, b"moov").unwrap();

        let upload = Upload::from_path(&path, FileSize::from_mb(1)).unwrap();
        assert_eq!(upload.file_name, "IMG_0008.MOV");
        assert_eq!(upload.bytes, b"moov");
        assert_eq!(upload.declared_size, 4);
    }

    #[test]
    fn test_rejected_upload_runs_no_tool_and_writes_nothing() {
        let mut session = Session::new(PipelineConfig::default()).unwrap();
        let err = session
            .load(&ctx(), Upload::new("clip.webm", vec![1, 2, 3]))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(session.tracked_artifacts(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_probe_failure_cleans_upload() {
        let mut session = Session::new(PipelineConfig::default()).unwrap();
        let err = session
            .load(&ctx(), Upload::new("clip.mp4", b"not a video".to_vec()))
            .unwrap_err();
        assert!(!err.is_validation());
        assert_eq!(session.tracked_artifacts(), 0);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(std::fs::read_dir(session.artifact_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_work_dir_is_honoured() {
        let parent = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            work_dir: Some(parent.path().to_path_buf()),
            ..Default::default()
        };
        let session = Session::new(config).unwrap();
        assert!(session.artifact_dir().starts_with(parent.path()));
    }
}
