//! # rc-av
//!
//! On-demand media transcoding for reelcast.
//!
//! This crate provides:
//!
//! - **Codec profiles** ([`Codec`], [`CodecProfile`]) -- the closed set of
//!   supported output formats and their per-family argument builders.
//! - **Request resolution** ([`TranscodeRequest`],
//!   [`resolve_encode_parameters`]) -- quality tier to bitrate lookup and
//!   aspect-preserving dimension math.
//! - **Process runner** ([`ProcessRunner`]) -- spawns the encoder, streams
//!   its stdout to a [`ChunkSink`], and guarantees the child is reaped or
//!   killed on every exit path.
//! - **Direct streaming** ([`direct::stream_file`]) -- passthrough of the
//!   source bytes with the same cancellation contract.
//! - **Transcoder facade** ([`Transcoder`]) -- plan, then execute or stream.
//! - **Tool discovery** ([`ToolRegistry`]), one-shot commands
//!   ([`ToolCommand`]) and ffprobe source probing ([`probe::probe_source`]).

pub mod codec;
pub mod command;
pub mod direct;
pub mod probe;
pub mod process;
pub mod request;
pub mod sink;
pub mod tools;
pub mod transcoder;

// ---- Re-exports for convenience ----

pub use codec::{Codec, CodecProfile};
pub use command::{ToolCommand, ToolOutput};
pub use probe::{probe_source, SourceInfo};
pub use process::{EncoderInvocation, ExitState, ProcessRunner, RunSummary, TranscodeSettings};
pub use request::{
    resolve_bitrates, resolve_dimensions, resolve_encode_parameters, QualityTier,
    ResolvedEncodeParameters, TranscodeRequest, QUALITY_TIERS,
};
pub use sink::{ChannelSink, ChunkSink, WriterSink};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{TranscodeOutput, TranscodePlan, TranscodeStream, Transcoder};

pub use tokio_util::sync::CancellationToken;
