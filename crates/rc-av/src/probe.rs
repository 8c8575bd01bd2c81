//! Source probing via `ffprobe`.
//!
//! Fills in what dimension resolution needs when the catalog has no
//! stream metadata for an item (e.g. a file passed on the command line).

use std::path::Path;

use rc_core::{Dimensions, Error, MediaItem, Result};
use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// What probing learned about a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    /// First video stream's frame size.
    pub dimensions: Option<Dimensions>,
    pub duration_secs: Option<u32>,
    /// Overall bitrate in kbit/s.
    pub bitrate: Option<u32>,
    pub format_name: Option<String>,
}

impl SourceInfo {
    /// Copy probed values into fields the catalog left empty.
    pub fn fill(&self, item: &mut MediaItem) {
        if item.dimensions().is_none() {
            if let Some(d) = self.dimensions {
                item.width = Some(d.width);
                item.height = Some(d.height);
            }
        }
        item.duration_secs = item.duration_secs.or(self.duration_secs);
        item.bitrate = item.bitrate.or(self.bitrate);
    }
}

/// Run `ffprobe` on `path` and parse its JSON report.
pub async fn probe_source(ffprobe: &Path, path: &Path) -> Result<SourceInfo> {
    if !path.exists() {
        return Err(Error::source_unavailable(path, "file does not exist"));
    }

    let output = ToolCommand::new(ffprobe.to_path_buf())
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path.to_string_lossy())
        .execute()
        .await?;

    parse_probe_output(&output.stdout)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Parse `ffprobe -print_format json` output.
pub fn parse_probe_output(json: &str) -> Result<SourceInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::tool("ffprobe", format!("JSON parse error: {e}")))?;

    let dimensions = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions::new(w, h)),
            _ => None,
        });

    let format = probe.format;
    let duration_secs = format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .map(|d| d.round() as u32);
    let bitrate = format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok())
        .map(|bps| (bps / 1000) as u32);

    Ok(SourceInfo {
        dimensions,
        duration_secs,
        bitrate,
        format_name: format.and_then(|f| f.format_name),
    })
}
