//! HLS playlist types.

use serde::{Deserialize, Serialize};

/// A single segment in a media playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment duration in seconds.
    pub duration: f64,
    /// URI for this segment, relative to the playlist.
    pub uri: String,
    /// Optional human-readable title from `#EXTINF`.
    pub title: Option<String>,
    /// Segment-level tags that preceded the `#EXTINF` line
    /// (e.g. `#EXT-X-DISCONTINUITY`), kept verbatim.
    pub tags: Vec<String>,
}

impl Segment {
    pub fn new(duration: f64, uri: impl Into<String>) -> Self {
        Self {
            duration,
            uri: uri.into(),
            title: None,
            tags: Vec::new(),
        }
    }
}

/// An HLS media playlist describing a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    /// `#EXT-X-VERSION`, if declared.
    pub version: Option<u32>,
    /// Maximum segment duration in integer seconds (rounded up).
    pub target_duration: u32,
    /// Sequence number of the first segment.
    pub media_sequence: u64,
    /// Whether `#EXT-X-PLAYLIST-TYPE:VOD` is present.
    pub vod: bool,
    /// `TIME-OFFSET` of `#EXT-X-START`, if present.
    pub start_offset: Option<f64>,
    /// Header tags this crate does not interpret, kept in order.
    pub header_tags: Vec<String>,
    /// Ordered list of segments.
    pub segments: Vec<Segment>,
    /// Whether the playlist is complete. If true, `#EXT-X-ENDLIST` is emitted.
    pub ended: bool,
}

impl Default for MediaPlaylist {
    fn default() -> Self {
        Self {
            version: Some(3),
            target_duration: 0,
            media_sequence: 0,
            vod: false,
            start_offset: None,
            header_tags: Vec::new(),
            segments: Vec::new(),
            ended: false,
        }
    }
}

impl MediaPlaylist {
    /// Longest segment duration, or 0 for an empty playlist.
    pub fn longest_segment(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).fold(0.0, f64::max)
    }
}
