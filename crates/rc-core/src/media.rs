//! Media model consumed from the catalog.
//!
//! The transcoding pipeline never owns or mutates catalog state: a
//! [`MediaItem`] is a read-only descriptor whose on-disk location is derived
//! by joining its folder's path (looked up through [`FolderLookup`]) with the
//! item's file name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ids::{FolderId, ItemId};

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Whether a stream carries audio only or video (with audio).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dimensions
// ---------------------------------------------------------------------------

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// FolderLookup
// ---------------------------------------------------------------------------

/// Resolves catalog folder ids to directories on disk.
pub trait FolderLookup: Send + Sync {
    fn folder_path(&self, folder_id: FolderId) -> Option<PathBuf>;
}

impl FolderLookup for HashMap<FolderId, PathBuf> {
    fn folder_path(&self, folder_id: FolderId) -> Option<PathBuf> {
        self.get(&folder_id).cloned()
    }
}

// ---------------------------------------------------------------------------
// MediaItem
// ---------------------------------------------------------------------------

/// A source media file as described by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub item_id: ItemId,
    pub folder_id: FolderId,
    pub file_name: String,
    /// Duration in whole seconds.
    #[serde(default)]
    pub duration_secs: Option<u32>,
    /// Overall bitrate in kbit/s.
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Unix timestamp of the last modification.
    #[serde(default)]
    pub last_modified: Option<i64>,
    /// Native frame width; `None` for audio items.
    #[serde(default)]
    pub width: Option<u32>,
    /// Native frame height; `None` for audio items.
    #[serde(default)]
    pub height: Option<u32>,
}

impl MediaItem {
    /// Create a descriptor with only identity and location populated.
    pub fn new(item_id: ItemId, folder_id: FolderId, file_name: impl Into<String>) -> Self {
        Self {
            item_id,
            folder_id,
            file_name: file_name.into(),
            duration_secs: None,
            bitrate: None,
            file_size: None,
            last_modified: None,
            width: None,
            height: None,
        }
    }

    /// Build a descriptor for a file that is not in any catalog.
    ///
    /// Returns the item together with a single-entry folder map that
    /// resolves it, so the pipeline can treat it like any catalog item.
    pub fn from_path(path: &Path) -> Result<(Self, HashMap<FolderId, PathBuf>)> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::source_unavailable(path, "path has no file name"))?;
        let folder = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let folder_id = FolderId::new();
        let mut folders = HashMap::new();
        folders.insert(folder_id, folder);

        Ok((Self::new(ItemId::new(), folder_id, file_name), folders))
    }

    /// Attach native frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Native dimensions, when both are known and non-zero.
    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions::new(w, h)),
            _ => None,
        }
    }

    /// Absolute location of the file: the owning folder's path joined with
    /// the file name.
    pub fn file_path(&self, folders: &dyn FolderLookup) -> Result<PathBuf> {
        let folder = folders.folder_path(self.folder_id).ok_or_else(|| {
            Error::source_unavailable(
                PathBuf::from(&self.file_name),
                format!("folder {} is not in the catalog", self.folder_id),
            )
        })?;
        Ok(folder.join(&self.file_name))
    }

    /// File extension in lowercase, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// MIME type for a source file served unmodified, derived from its extension.
pub fn mime_type_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" | "m2ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
