//! Transcode requests and encode-parameter resolution.
//!
//! A [`TranscodeRequest`] says what the caller wants; [`resolve_encode_parameters`]
//! turns it into concrete bitrates and frame dimensions once, before any
//! process exists. Everything here is synchronous and pure.

use rc_core::{Dimensions, Error, MediaItem, MediaKind, Result};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;

// ---------------------------------------------------------------------------
// Quality tiers
// ---------------------------------------------------------------------------

/// One row of the quality table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityTier {
    pub tier: u32,
    /// Audio bitrate in kbit/s.
    pub audio_kbps: u32,
    /// Video bitrate in kbit/s.
    pub video_kbps: u32,
}

/// Fixed quality table, indexed by tier.
///
/// | tier | audio | video |
/// |------|-------|-------|
/// | 0    | 64k   | 256k  |
/// | 1    | 96k   | 512k  |
/// | 2    | 128k  | 1024k |
/// | 3    | 192k  | 2048k |
/// | 4    | 320k  | 4096k |
pub const QUALITY_TIERS: &[QualityTier] = &[
    QualityTier { tier: 0, audio_kbps: 64, video_kbps: 256 },
    QualityTier { tier: 1, audio_kbps: 96, video_kbps: 512 },
    QualityTier { tier: 2, audio_kbps: 128, video_kbps: 1024 },
    QualityTier { tier: 3, audio_kbps: 192, video_kbps: 2048 },
    QualityTier { tier: 4, audio_kbps: 320, video_kbps: 4096 },
];

/// Look up `(audio_kbps, video_kbps)` for a tier.
///
/// Tiers outside the table fail with [`Error::InvalidQualityTier`]; they are
/// never clamped.
pub fn resolve_bitrates(tier: u32) -> Result<(u32, u32)> {
    QUALITY_TIERS
        .get(tier as usize)
        .map(|q| (q.audio_kbps, q.video_kbps))
        .ok_or(Error::InvalidQualityTier {
            tier,
            max: (QUALITY_TIERS.len() - 1) as u32,
        })
}

// ---------------------------------------------------------------------------
// Dimensions
// ---------------------------------------------------------------------------

/// Round to the nearest even integer, never below 2.
fn even(value: f64) -> u32 {
    let halves = (value / 2.0).round().max(1.0);
    halves as u32 * 2
}

/// Resolve output dimensions from the requested target and the source.
///
/// - Both sides given: used as-is (rounded to even).
/// - One side given with `maintain_aspect`: the other is derived from the
///   source aspect ratio and rounded to the nearest even integer.
/// - One side given without `maintain_aspect`: the other is the source's
///   native size.
/// - Neither given: the source's native size.
pub fn resolve_dimensions(
    source: Option<Dimensions>,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect: bool,
) -> Result<Dimensions> {
    if width == Some(0) || height == Some(0) {
        return Err(Error::Validation("target width/height must be non-zero".into()));
    }

    let need_source = || {
        source.ok_or_else(|| {
            Error::Validation(
                "source dimensions are unknown; supply both width and height".into(),
            )
        })
    };

    let dims = match (width, height) {
        (Some(w), Some(h)) => Dimensions::new(even(f64::from(w)), even(f64::from(h))),
        (None, Some(h)) => {
            let src = need_source()?;
            let w = if maintain_aspect {
                even(f64::from(h) * src.aspect_ratio())
            } else {
                even(f64::from(src.width))
            };
            Dimensions::new(w, even(f64::from(h)))
        }
        (Some(w), None) => {
            let src = need_source()?;
            let h = if maintain_aspect {
                even(f64::from(w) / src.aspect_ratio())
            } else {
                even(f64::from(src.height))
            };
            Dimensions::new(even(f64::from(w)), h)
        }
        (None, None) => {
            let src = need_source()?;
            Dimensions::new(even(f64::from(src.width)), even(f64::from(src.height)))
        }
    };

    Ok(dims)
}

// ---------------------------------------------------------------------------
// TranscodeRequest
// ---------------------------------------------------------------------------

/// What a caller wants streamed. Lives for one response; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub source: MediaItem,
    pub codec: Codec,
    pub quality: u32,
    /// Stream the source unmodified; no encoding parameters are consulted.
    pub direct: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect: bool,
    pub offset_secs: u32,
    /// Zero means "to the end".
    pub length_secs: u32,
}

impl TranscodeRequest {
    /// A request for `source` in `codec` at tier 0, native size, full length.
    pub fn new(source: MediaItem, codec: Codec) -> Self {
        Self {
            source,
            codec,
            quality: 0,
            direct: false,
            width: None,
            height: None,
            maintain_aspect: true,
            offset_secs: 0,
            length_secs: 0,
        }
    }

    pub fn quality(mut self, tier: u32) -> Self {
        self.quality = tier;
        self
    }

    pub fn direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    pub fn width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: Option<u32>) -> Self {
        self.height = height;
        self
    }

    pub fn maintain_aspect(mut self, maintain: bool) -> Self {
        self.maintain_aspect = maintain;
        self
    }

    pub fn offset(mut self, secs: u32) -> Self {
        self.offset_secs = secs;
        self
    }

    pub fn length(mut self, secs: u32) -> Self {
        self.length_secs = secs;
        self
    }
}

// ---------------------------------------------------------------------------
// ResolvedEncodeParameters
// ---------------------------------------------------------------------------

/// Concrete encoder settings derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEncodeParameters {
    /// Audio bitrate in kbit/s.
    pub audio_bitrate: u32,
    /// Video bitrate in kbit/s.
    pub video_bitrate: u32,
    /// Output frame size; `None` for audio-only codecs.
    pub dimensions: Option<Dimensions>,
}

/// Resolve bitrates and (for video codecs) dimensions for a request.
pub fn resolve_encode_parameters(request: &TranscodeRequest) -> Result<ResolvedEncodeParameters> {
    let (audio_bitrate, video_bitrate) = resolve_bitrates(request.quality)?;

    let dimensions = match request.codec.profile().kind {
        MediaKind::Video => Some(resolve_dimensions(
            request.source.dimensions(),
            request.width,
            request.height,
            request.maintain_aspect,
        )?),
        MediaKind::Audio => None,
    };

    Ok(ResolvedEncodeParameters {
        audio_bitrate,
        video_bitrate,
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::{FolderId, ItemId};

    fn hd() -> Option<Dimensions> {
        Some(Dimensions::new(1920, 1080))
    }

    #[test]
    fn every_tier_maps_to_its_table_row() {
        let expected = [(64, 256), (96, 512), (128, 1024), (192, 2048), (320, 4096)];
        for (tier, pair) in expected.iter().enumerate() {
            assert_eq!(resolve_bitrates(tier as u32).unwrap(), *pair);
        }
    }

    #[test]
    fn out_of_table_tier_is_rejected() {
        let err = resolve_bitrates(5).unwrap_err();
        assert!(matches!(err, Error::InvalidQualityTier { tier: 5, max: 4 }));
        assert!(resolve_bitrates(u32::MAX).is_err());
    }

    #[test]
    fn height_only_keeps_aspect_with_even_width() {
        let dims = resolve_dimensions(hd(), None, Some(480), true).unwrap();
        assert_eq!(dims, Dimensions::new(854, 480));
    }

    #[test]
    fn width_only_keeps_aspect_with_even_height() {
        let dims = resolve_dimensions(hd(), Some(1280), None, true).unwrap();
        assert_eq!(dims, Dimensions::new(1280, 720));

        // 4:3 source, 500 wide -> 375 exact -> 376 even
        let dims = resolve_dimensions(Some(Dimensions::new(640, 480)), Some(500), None, true)
            .unwrap();
        assert_eq!(dims, Dimensions::new(500, 376));
    }

    #[test]
    fn computed_width_is_nearest_even_of_exact_ratio() {
        let sources = [(1920, 1080), (1280, 720), (720, 576), (640, 480), (3840, 1600), (853, 480)];
        let heights = [144, 240, 360, 480, 576, 720, 1080];
        for (sw, sh) in sources {
            for h in heights {
                let dims =
                    resolve_dimensions(Some(Dimensions::new(sw, sh)), None, Some(h), true).unwrap();
                let exact = f64::from(h) * f64::from(sw) / f64::from(sh);
                assert_eq!(dims.width % 2, 0, "{sw}x{sh} @ {h}");
                assert!(
                    (f64::from(dims.width) - exact).abs() <= 1.0,
                    "{sw}x{sh} @ {h}: {} vs {exact}",
                    dims.width
                );
            }
        }
    }

    #[test]
    fn no_aspect_uses_native_for_missing_side() {
        let dims = resolve_dimensions(hd(), None, Some(480), false).unwrap();
        assert_eq!(dims, Dimensions::new(1920, 480));
    }

    #[test]
    fn nothing_requested_falls_back_to_native() {
        let dims = resolve_dimensions(hd(), None, None, true).unwrap();
        assert_eq!(dims, Dimensions::new(1920, 1080));
    }

    #[test]
    fn both_sides_given_ignores_source() {
        let dims = resolve_dimensions(None, Some(640), Some(360), true).unwrap();
        assert_eq!(dims, Dimensions::new(640, 360));
    }

    #[test]
    fn unknown_source_needs_both_sides() {
        let err = resolve_dimensions(None, None, Some(480), true).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(resolve_dimensions(None, None, None, true).is_err());
    }

    #[test]
    fn zero_target_is_rejected() {
        assert!(resolve_dimensions(hd(), Some(0), None, true).is_err());
    }

    #[test]
    fn audio_codecs_resolve_no_dimensions() {
        let item = MediaItem::new(ItemId::new(), FolderId::new(), "song.flac");
        let req = TranscodeRequest::new(item, Codec::Mp3).quality(3);
        let params = resolve_encode_parameters(&req).unwrap();
        assert_eq!(params.audio_bitrate, 192);
        assert!(params.dimensions.is_none());
    }

    #[test]
    fn video_request_resolves_everything() {
        let item = MediaItem::new(ItemId::new(), FolderId::new(), "film.mkv")
            .with_dimensions(1920, 1080);
        let req = TranscodeRequest::new(item, Codec::X264)
            .quality(2)
            .height(Some(480));
        let params = resolve_encode_parameters(&req).unwrap();
        assert_eq!(
            params,
            ResolvedEncodeParameters {
                audio_bitrate: 128,
                video_bitrate: 1024,
                dimensions: Some(Dimensions::new(854, 480)),
            }
        );
    }
}
