//! Receive pipeline: the stages a message goes through after the socket has
//! been read and closed.
//!
//! Stages run strictly in `STAGES` order over one mutable
//! [`ProcessingContext`]; the first failing stage ends the run.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{HostError, Result};
use crate::host::placement::{normalize_path, place_file, resolve_target};
use crate::host::remote::{
    Globals, RemoteClient, RemoteFile, TransformContext, TransformMode, ValidatorContext,
};
use crate::host::transform::{gunzip_blocking, DataTransformer};
use crate::host::validator::FileValidator;

/// Everything a connection goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    DirectoryChecked,
    FrameRead,
    MessageDecoded,
    EnvelopeUntransformed,
    FileParsed,
    DataDecompressed,
    DataUntransformed,
    Validated,
    Placed,
    Completed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    UntransformEnvelope,
    ParseFile,
    Decompress,
    UntransformData,
    Validate,
    Place,
}

pub const STAGES: &[Stage] = &[
    Stage::UntransformEnvelope,
    Stage::ParseFile,
    Stage::Decompress,
    Stage::UntransformData,
    Stage::Validate,
    Stage::Place,
];

impl Stage {
    /// State reached once this stage succeeds.
    pub fn reaches(self) -> ConnectionState {
        match self {
            Stage::UntransformEnvelope => ConnectionState::EnvelopeUntransformed,
            Stage::ParseFile => ConnectionState::FileParsed,
            Stage::Decompress => ConnectionState::DataDecompressed,
            Stage::UntransformData => ConnectionState::DataUntransformed,
            Stage::Validate => ConnectionState::Validated,
            Stage::Place => ConnectionState::Placed,
        }
    }
}

/// Per-connection state threaded through the stages.
#[derive(Debug)]
pub struct ProcessingContext<'a> {
    pub remote: &'a RemoteClient,
    pub state: ConnectionState,
    /// Raw message body, replaced by the restored envelope
    pub message: Vec<u8>,
    pub file: Option<RemoteFile>,
    /// Destination; set by the validate stage
    pub target: Option<PathBuf>,
    pub bytes_written: u64,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(remote: &'a RemoteClient) -> Self {
        Self {
            remote,
            state: ConnectionState::Accepted,
            message: Vec::new(),
            file: None,
            target: None,
            bytes_written: 0,
        }
    }

    fn file_mut(&mut self) -> Result<&mut RemoteFile> {
        self.file
            .as_mut()
            .ok_or_else(|| HostError::Envelope("no file parsed".to_string()))
    }
}

/// Modules and paths fixed for the lifetime of one running host.
#[derive(Clone)]
pub struct Pipeline {
    /// Absolute root directory for received files
    pub root: PathBuf,
    /// Base for relative targets handed back by a validator
    pub workspace: PathBuf,
    pub message_transformer: Arc<dyn DataTransformer>,
    pub file_transformer: Arc<dyn DataTransformer>,
    pub validator: Arc<dyn FileValidator>,
    pub globals: Arc<Globals>,
    /// Cap on gunzipped payload size
    pub max_decompressed_size: u64,
}

impl Pipeline {
    /// Run every stage over `ctx`, stopping at the first failure.
    pub async fn run(&self, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        for &stage in STAGES {
            tracing::debug!("{}: running {:?}", ctx.remote, stage);
            self.run_stage(stage, ctx).await?;
            ctx.state = stage.reaches();
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut ProcessingContext<'_>) -> Result<()> {
        match stage {
            Stage::UntransformEnvelope => {
                let message = std::mem::take(&mut ctx.message);
                ctx.message = self
                    .restore(&*self.message_transformer, TransformMode::Message, message, ctx.remote)
                    .await?;
            }
            Stage::ParseFile => {
                ctx.file = Some(RemoteFile::from_json(&ctx.message)?);
                ctx.message = Vec::new();
            }
            Stage::Decompress => {
                let file = ctx.file_mut()?;
                if file.is_compressed {
                    let data = std::mem::take(&mut file.data);
                    file.data = gunzip_blocking(data, self.max_decompressed_size)
                        .await
                        .map_err(HostError::Decompression)?;
                }
            }
            Stage::UntransformData => {
                let remote = ctx.remote;
                let file = ctx.file_mut()?;
                let data = std::mem::take(&mut file.data);
                file.data = self
                    .restore(&*self.file_transformer, TransformMode::FileData, data, remote)
                    .await?;
            }
            Stage::Validate => {
                let remote = ctx.remote;
                let file = ctx.file_mut()?;
                let target = resolve_target(&self.root, &file.name)?;

                let mut vctx = ValidatorContext {
                    target,
                    remote,
                    globals: &self.globals,
                };
                let accepted = self
                    .validator
                    .validate(file, &mut vctx)
                    .await
                    .map_err(|cause| HostError::Validation {
                        name: file.name.clone(),
                        cause,
                    })?;
                if !accepted {
                    return Err(HostError::Rejected {
                        name: file.name.clone(),
                    });
                }

                let target = if vctx.target.is_absolute() {
                    vctx.target
                } else {
                    self.workspace.join(vctx.target)
                };
                ctx.target = Some(normalize_path(&target));
            }
            Stage::Place => {
                let target = ctx
                    .target
                    .clone()
                    .ok_or_else(|| HostError::Protocol("no target resolved".to_string()))?;
                let file = ctx.file_mut()?;
                let written = place_file(&target, &file.data).await?;
                ctx.bytes_written = written;
            }
        }
        Ok(())
    }

    async fn restore(
        &self,
        transformer: &dyn DataTransformer,
        mode: TransformMode,
        data: Vec<u8>,
        remote: &RemoteClient,
    ) -> Result<Vec<u8>> {
        let tctx = TransformContext {
            mode,
            remote,
            globals: &self.globals,
        };
        transformer
            .restore(data, &tctx)
            .await
            .map_err(|cause| HostError::Transform { mode, cause })
    }
}
