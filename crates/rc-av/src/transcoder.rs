//! Transcoder facade: plan a request, then execute or stream it.
//!
//! Planning is synchronous and does all validation (codec, tier,
//! dimensions, source location, encoder availability) so that nothing is
//! spawned for a request that cannot succeed. Each plan is independent;
//! the transcoder holds no per-request state.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use rc_core::{mime_type_for_extension, Error, FolderLookup, Result};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::Codec;
use crate::direct;
use crate::process::{EncoderInvocation, ProcessRunner, TranscodeSettings};
use crate::request::{resolve_encode_parameters, ResolvedEncodeParameters, TranscodeRequest};
use crate::sink::ChunkSink;
use crate::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// TranscodeStream
// ---------------------------------------------------------------------------

/// Output of a background encode or direct stream.
///
/// Yields chunks in order. A failed run ends with an `Err` item instead of a
/// plain end-of-stream. Dropping the stream cancels the work behind it.
pub struct TranscodeStream {
    inner: ReceiverStream<Result<Bytes>>,
    cancel: CancellationToken,
}

impl TranscodeStream {
    pub(crate) fn new(inner: ReceiverStream<Result<Bytes>>, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    /// Stop the underlying work; remaining buffered chunks may still arrive.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for TranscodeStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TranscodeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A validated, ready-to-run request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TranscodePlan {
    /// Stream the source file unmodified.
    Direct {
        path: PathBuf,
        mime_type: &'static str,
    },
    /// Run the encoder.
    Encode {
        codec: Codec,
        invocation: EncoderInvocation,
        params: ResolvedEncodeParameters,
    },
}

impl TranscodePlan {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Direct { mime_type, .. } => mime_type,
            Self::Encode { codec, .. } => codec.mime_type(),
        }
    }

    /// Output file extension; `None` in direct mode.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Direct { .. } => None,
            Self::Encode { codec, .. } => Some(codec.extension()),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }
}

/// What the serving layer needs to write a response.
#[derive(Debug)]
pub struct TranscodeOutput {
    pub mime_type: &'static str,
    pub extension: Option<&'static str>,
    pub stream: TranscodeStream,
}

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

/// Entry point for on-demand transcoding.
#[derive(Clone)]
pub struct Transcoder {
    tools: ToolRegistry,
    runner: ProcessRunner,
    folders: Arc<dyn FolderLookup>,
}

impl Transcoder {
    pub fn new(
        tools: ToolRegistry,
        settings: TranscodeSettings,
        folders: Arc<dyn FolderLookup>,
    ) -> Self {
        Self {
            tools,
            runner: ProcessRunner::new(settings),
            folders,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn settings(&self) -> &TranscodeSettings {
        self.runner.settings()
    }

    /// Validate `request` and build its plan. Never spawns a process.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceUnavailable`] if the source cannot be located.
    /// - [`Error::InvalidQualityTier`] / [`Error::Validation`] for bad
    ///   encode parameters (encode mode only).
    /// - [`Error::Tool`] if the codec's encoder is not installed.
    pub fn plan(&self, request: &TranscodeRequest) -> Result<TranscodePlan> {
        let path = request.source.file_path(self.folders.as_ref())?;
        if !path.is_file() {
            return Err(Error::source_unavailable(path, "not a readable file"));
        }

        if request.direct {
            if request.offset_secs > 0 || request.length_secs > 0 {
                debug!(
                    offset = request.offset_secs,
                    length = request.length_secs,
                    "Direct mode ignores offset/length"
                );
            }
            let mime_type = request
                .source
                .extension()
                .map(|ext| mime_type_for_extension(&ext))
                .unwrap_or("application/octet-stream");
            return Ok(TranscodePlan::Direct { path, mime_type });
        }

        let params = resolve_encode_parameters(request)?;
        let encoder = self.tools.require(request.codec.encoder_command())?;
        let args = request.codec.build_arguments(request, &params, &path);

        Ok(TranscodePlan::Encode {
            codec: request.codec,
            invocation: EncoderInvocation::new(encoder.path.clone(), args),
            params,
        })
    }

    /// Run `plan` into `sink`, returning the number of bytes delivered.
    pub async fn execute<S>(
        &self,
        plan: &TranscodePlan,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        S: ChunkSink + ?Sized,
    {
        match plan {
            TranscodePlan::Direct { path, .. } => {
                direct::stream_file(path, sink, cancel, self.settings().chunk_size).await
            }
            TranscodePlan::Encode { codec, invocation, .. } => {
                info!(codec = %codec, "Starting encode");
                let summary = self.runner.run(invocation, sink, cancel).await?;
                Ok(summary.bytes)
            }
        }
    }

    /// Run `plan` in the background and hand back its output stream.
    pub fn stream(&self, plan: &TranscodePlan, cancel: &CancellationToken) -> TranscodeOutput {
        let stream = match plan {
            TranscodePlan::Direct { path, .. } => {
                direct::stream_direct(path.clone(), self.settings().chunk_size, cancel)
            }
            TranscodePlan::Encode { invocation, .. } => self.runner.stream(invocation.clone(), cancel),
        };

        TranscodeOutput {
            mime_type: plan.mime_type(),
            extension: plan.extension(),
            stream,
        }
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("tools", &self.tools)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}
