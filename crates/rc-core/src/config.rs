//! reelcast configuration, read from a JSON file.
//!
//! Every field has a default, so `{}` is a complete config. Unknown codec
//! ids and zero limits are accepted but reported by [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::ids::FolderId;
use crate::Error;

/// Codec ids accepted by `transcode.default_codec`.
const KNOWN_CODECS: &[&str] = &["x264", "vp8", "mp3", "aac", "vorbis", "opus"];

/// Encoder stdout read size used when `transcode.chunk_size` is unset or 0.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Everything read from `reelcast.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub maintenance: MaintenanceConfig,
    /// Catalog folders by id, used when no external catalog is attached.
    pub folders: HashMap<FolderId, PathBuf>,
}

impl Config {
    /// Parse JSON; a malformed document is a [`Error::Validation`].
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file, failing on any read or parse error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Like [`Config::load`], but never fails: a missing path, unreadable
    /// file, or parse error all yield the defaults (and a log line).
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Settings that parse but will not behave as intended.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.transcode.max_encode_secs == 0 {
            warnings.push("transcode.max_encode_secs is 0; every encode will be cancelled".into());
        }

        if self.transcode.chunk_size == 0 {
            warnings.push("transcode.chunk_size is 0; the default read size will be used".into());
        }

        if !KNOWN_CODECS.contains(&self.transcode.default_codec.as_str()) {
            warnings.push(format!(
                "transcode.default_codec '{}' is not a registered codec (valid: {})",
                self.transcode.default_codec,
                KNOWN_CODECS.join(", ")
            ));
        }

        if self.maintenance.enabled && self.maintenance.purge_interval_secs == 0 {
            warnings.push("maintenance is enabled but purge_interval_secs is 0".into());
        }

        for (id, path) in &self.folders {
            if path.as_os_str().is_empty() {
                warnings.push(format!("folders[{id}] has an empty path"));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Explicit encoder and prober locations; unset means search `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Limits applied to every encoder invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Wall-clock limit for a single encode; expiry cancels it.
    pub max_encode_secs: u64,
    /// How long to wait for a killed encoder to be reaped.
    pub kill_grace_ms: u64,
    /// Size of the retained tail of encoder stderr.
    pub stderr_buffer_bytes: usize,
    /// Read size for encoder stdout and direct file streaming.
    pub chunk_size: usize,
    pub default_codec: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_encode_secs: 4 * 60 * 60,
            kill_grace_ms: 5_000,
            stderr_buffer_bytes: 8 * 1024,
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_codec: "x264".into(),
        }
    }
}

/// Background purge of expired users and idle sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_session_timeout() -> u64 {
    30
}

fn default_purge_interval() -> u64 {
    3600
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_timeout_minutes: default_session_timeout(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}
