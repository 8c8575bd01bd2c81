//! Codec profiles and per-family encoder argument builders.
//!
//! [`Codec`] is a closed set of output formats. Each variant carries a
//! static [`CodecProfile`] (encoder command, container extension, MIME type)
//! and dispatches to one pure argument-building function for its family.
//! All builders write to `pipe:1` so the process runner can stream stdout.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rc_core::{Dimensions, Error, MediaKind, Result};
use serde::{Deserialize, Serialize};

use crate::request::{ResolvedEncodeParameters, TranscodeRequest};

/// Encoder output target: standard output of the child process.
pub const OUTPUT_PIPE: &str = "pipe:1";

/// Audio sample rate forced on every output.
const SAMPLE_RATE: u32 = 44_100;

/// Audio channel count forced on every output.
const CHANNELS: u32 = 2;

// ---------------------------------------------------------------------------
// CodecProfile
// ---------------------------------------------------------------------------

/// Static description of one output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodecProfile {
    /// Registry key, unique across all profiles.
    pub id: &'static str,
    /// Human-readable codec name.
    pub name: &'static str,
    /// External tool that performs the encode.
    pub encoder_command: &'static str,
    /// Encoder library selected via `-vcodec`/`-acodec`.
    pub encoder_codec: &'static str,
    /// Muxer passed to `-f`.
    pub format: &'static str,
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub kind: MediaKind,
}

impl CodecProfile {
    /// Find the profile registered under `id`.
    pub fn lookup(id: &str) -> Result<&'static CodecProfile> {
        Codec::from_id(id).map(Codec::profile)
    }
}

const X264: CodecProfile = CodecProfile {
    id: "x264",
    name: "H.264",
    encoder_command: "ffmpeg",
    encoder_codec: "libx264",
    format: "mpegts",
    extension: "ts",
    mime_type: "video/mp2t",
    kind: MediaKind::Video,
};

const VP8: CodecProfile = CodecProfile {
    id: "vp8",
    name: "VP8",
    encoder_command: "ffmpeg",
    encoder_codec: "libvpx",
    format: "webm",
    extension: "webm",
    mime_type: "video/webm",
    kind: MediaKind::Video,
};

const MP3: CodecProfile = CodecProfile {
    id: "mp3",
    name: "MP3",
    encoder_command: "ffmpeg",
    encoder_codec: "libmp3lame",
    format: "mp3",
    extension: "mp3",
    mime_type: "audio/mpeg",
    kind: MediaKind::Audio,
};

const AAC: CodecProfile = CodecProfile {
    id: "aac",
    name: "AAC",
    encoder_command: "ffmpeg",
    encoder_codec: "aac",
    format: "adts",
    extension: "aac",
    mime_type: "audio/aac",
    kind: MediaKind::Audio,
};

const VORBIS: CodecProfile = CodecProfile {
    id: "vorbis",
    name: "Ogg Vorbis",
    encoder_command: "ffmpeg",
    encoder_codec: "libvorbis",
    format: "ogg",
    extension: "ogg",
    mime_type: "audio/ogg",
    kind: MediaKind::Audio,
};

const OPUS: CodecProfile = CodecProfile {
    id: "opus",
    name: "Opus",
    encoder_command: "ffmpeg",
    encoder_codec: "libopus",
    format: "opus",
    extension: "opus",
    mime_type: "audio/ogg",
    kind: MediaKind::Audio,
};

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Supported output codec families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    X264,
    Vp8,
    Mp3,
    Aac,
    Vorbis,
    Opus,
}

impl Codec {
    /// Every registered codec, in display order.
    pub const ALL: [Codec; 6] = [
        Codec::X264,
        Codec::Vp8,
        Codec::Mp3,
        Codec::Aac,
        Codec::Vorbis,
        Codec::Opus,
    ];

    /// Resolve a codec id (case-insensitive). `h264` is accepted for `x264`.
    pub fn from_id(id: &str) -> Result<Codec> {
        let wanted = id.trim().to_ascii_lowercase();
        if wanted == "h264" {
            return Ok(Codec::X264);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.profile().id == wanted)
            .ok_or_else(|| Error::UnsupportedCodec(id.to_string()))
    }

    pub fn profile(self) -> &'static CodecProfile {
        match self {
            Codec::X264 => &X264,
            Codec::Vp8 => &VP8,
            Codec::Mp3 => &MP3,
            Codec::Aac => &AAC,
            Codec::Vorbis => &VORBIS,
            Codec::Opus => &OPUS,
        }
    }

    pub fn id(self) -> &'static str {
        self.profile().id
    }

    pub fn encoder_command(self) -> &'static str {
        self.profile().encoder_command
    }

    pub fn extension(self) -> &'static str {
        self.profile().extension
    }

    pub fn mime_type(self) -> &'static str {
        self.profile().mime_type
    }

    /// Build the encoder argv (without the program name).
    ///
    /// Deterministic: identical inputs always produce identical output.
    pub fn build_arguments(
        self,
        request: &TranscodeRequest,
        params: &ResolvedEncodeParameters,
        input: &Path,
    ) -> Vec<String> {
        match self {
            Codec::X264 => h264_arguments(request, params, input),
            Codec::Vp8 => vp8_arguments(request, params, input),
            Codec::Mp3 | Codec::Aac | Codec::Vorbis | Codec::Opus => {
                audio_arguments(self.profile(), request, params, input)
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Codec::from_id(s)
    }
}

// ---------------------------------------------------------------------------
// Argument builders
// ---------------------------------------------------------------------------

fn push<const N: usize>(args: &mut Vec<String>, items: [&str; N]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn size_arg(dims: Dimensions) -> String {
    format!("{}x{}", dims.width, dims.height)
}

fn time_window(args: &mut Vec<String>, request: &TranscodeRequest) {
    // Zero is emitted too, so the argv shape never depends on the window.
    args.push("-ss".into());
    args.push(request.offset_secs.to_string());
    args.push("-t".into());
    args.push(request.length_secs.to_string());
}

fn audio_layout(args: &mut Vec<String>) {
    args.push("-ar".into());
    args.push(SAMPLE_RATE.to_string());
    args.push("-ac".into());
    args.push(CHANNELS.to_string());
}

fn h264_arguments(
    request: &TranscodeRequest,
    params: &ResolvedEncodeParameters,
    input: &Path,
) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];
    push(&mut args, ["-af", "aresample=async=1"]);
    args.push("-b:v".into());
    args.push(format!("{}k", params.video_bitrate));
    if let Some(dims) = params.dimensions {
        args.push("-s".into());
        args.push(size_arg(dims));
    }
    time_window(&mut args, request);
    audio_layout(&mut args);
    push(&mut args, ["-v", "error", "-f", X264.format, "-refs", "3"]);
    push(&mut args, ["-vcodec", X264.encoder_codec]);
    push(&mut args, ["-preset", "superfast", "-threads", "0"]);
    args.push(OUTPUT_PIPE.into());
    args
}

fn vp8_arguments(
    request: &TranscodeRequest,
    params: &ResolvedEncodeParameters,
    input: &Path,
) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];
    push(&mut args, ["-af", "aresample=async=1"]);
    args.push("-b:v".into());
    args.push(format!("{}k", params.video_bitrate));
    if let Some(dims) = params.dimensions {
        args.push("-s".into());
        args.push(size_arg(dims));
    }
    time_window(&mut args, request);
    audio_layout(&mut args);
    push(&mut args, ["-acodec", "libvorbis", "-b:a"]);
    args.push(format!("{}k", params.audio_bitrate));
    push(&mut args, ["-v", "error", "-f", VP8.format]);
    push(&mut args, ["-vcodec", VP8.encoder_codec]);
    push(&mut args, ["-deadline", "realtime", "-cpu-used", "8", "-threads", "0"]);
    args.push(OUTPUT_PIPE.into());
    args
}

fn audio_arguments(
    profile: &CodecProfile,
    request: &TranscodeRequest,
    params: &ResolvedEncodeParameters,
    input: &Path,
) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];
    args.push("-vn".into());
    time_window(&mut args, request);
    audio_layout(&mut args);
    args.push("-b:a".into());
    args.push(format!("{}k", params.audio_bitrate));
    push(&mut args, ["-v", "error", "-f", profile.format]);
    push(&mut args, ["-acodec", profile.encoder_codec]);
    args.push(OUTPUT_PIPE.into());
    args
}
