//! Command-line transcoding of a single file.
//!
//! Turns user options into a [`TranscodeRequest`] against a catalog-less
//! [`MediaItem`], probing the source for its native dimensions when
//! `ffprobe` is available.

use std::path::PathBuf;
use std::sync::Arc;

use rc_av::{
    probe_source, Codec, TranscodePlan, TranscodeRequest, TranscodeSettings, Transcoder,
    ToolRegistry, WriterSink,
};
use rc_core::config::Config;
use rc_core::{MediaItem, Result};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What to transcode and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub input: PathBuf,
    /// Codec id; `None` uses `transcode.default_codec`.
    pub codec: Option<String>,
    pub quality: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect: bool,
    pub offset_secs: u32,
    pub length_secs: u32,
    pub direct: bool,
}

impl TranscodeOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            codec: None,
            quality: 0,
            width: None,
            height: None,
            maintain_aspect: true,
            offset_secs: 0,
            length_secs: 0,
            direct: false,
        }
    }
}

/// A request bound to the transcoder that can serve it.
#[derive(Debug)]
pub struct Prepared {
    pub transcoder: Transcoder,
    pub request: TranscodeRequest,
}

impl Prepared {
    pub fn plan(&self) -> Result<TranscodePlan> {
        self.transcoder.plan(&self.request)
    }
}

/// Resolve tools, describe the source, and build the request.
pub async fn prepare(options: &TranscodeOptions, config: &Config) -> Result<Prepared> {
    let codec_id = options
        .codec
        .as_deref()
        .unwrap_or(&config.transcode.default_codec);
    let codec = Codec::from_id(codec_id)?;

    let (mut item, folders) = MediaItem::from_path(&options.input)?;
    let tools = ToolRegistry::discover(&config.tools);

    if !options.direct {
        if let Ok(ffprobe) = tools.require("ffprobe") {
            match probe_source(&ffprobe.path, &options.input).await {
                Ok(info) => {
                    debug!(?info, "Probed source");
                    info.fill(&mut item);
                }
                Err(e) if matches!(e, rc_core::Error::SourceUnavailable { .. }) => return Err(e),
                Err(e) => debug!("Probe failed, continuing without source info: {e}"),
            }
        }
    }

    let request = TranscodeRequest::new(item, codec)
        .quality(options.quality)
        .direct(options.direct)
        .width(options.width)
        .height(options.height)
        .maintain_aspect(options.maintain_aspect)
        .offset(options.offset_secs)
        .length(options.length_secs);

    let transcoder = Transcoder::new(
        tools,
        TranscodeSettings::from(&config.transcode),
        Arc::new(folders),
    );

    Ok(Prepared { transcoder, request })
}

/// Execute `plan` into `writer`, returning the bytes written.
pub async fn run_to_writer<W>(
    prepared: &Prepared,
    plan: &TranscodePlan,
    writer: W,
    cancel: &CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut sink = WriterSink::new(writer);
    let bytes = prepared.transcoder.execute(plan, &mut sink, cancel).await?;
    info!(
        item_id = %prepared.request.source.item_id,
        codec = %prepared.request.codec,
        bytes,
        mime = plan.mime_type(),
        "Transcode finished"
    );
    Ok(bytes)
}
