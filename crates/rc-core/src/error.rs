//! Unified error type for the reelcast transcoding pipeline.
//!
//! All crates funnel their failures into [`Error`], which carries enough
//! context for the serving layer to derive an HTTP status code via
//! [`Error::http_status`] and to tell a failed encode apart from a stream
//! that ended normally.

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering all failure modes in reelcast.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested codec is not registered.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The quality tier lies outside the bitrate table.
    #[error("Invalid quality tier {tier} (valid: 0..={max})")]
    InvalidQualityTier {
        /// The tier that was requested.
        tier: u32,
        /// Highest valid tier.
        max: u32,
    },

    /// The encoder ran and exited unsuccessfully.
    #[error("Encode failed (exit code {}): {stderr_excerpt}", display_code(.exit_code))]
    EncodeFailed {
        /// Exit code, or `None` when the encoder was terminated by a signal.
        exit_code: Option<i32>,
        /// Tail of the encoder's standard error.
        stderr_excerpt: String,
    },

    /// The consumer went away, the caller cancelled, or the wall-clock
    /// limit expired.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The source media file could not be located or opened.
    #[error("Source unavailable: {}: {reason}", .path.display())]
    SourceUnavailable {
        /// Path that was attempted.
        path: PathBuf,
        /// Why it could not be used.
        reason: String,
    },

    /// Malformed config or out-of-range request fields.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A user, session, or folder id that does not resolve.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// "user", "session", "folder", ...
        entity: String,
        id: String,
    },

    /// Reading the source or writing to the sink failed.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) could not be found or run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        tool: String,
        message: String,
    },

    /// A bug: a worker task vanished, or similar.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Status a serving layer should answer with. 499 marks a client
    /// that went away.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::UnsupportedCodec(_) => 400,
            Error::InvalidQualityTier { .. } => 400,
            Error::Validation(_) => 400,
            Error::EncodeFailed { .. } => 502,
            Error::Cancelled(_) => 499,
            Error::SourceUnavailable { .. } => 404,
            Error::NotFound { .. } => 404,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Whether this error is an expected cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn source_unavailable(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
