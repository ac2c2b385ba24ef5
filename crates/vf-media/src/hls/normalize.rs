//! Static-VOD normalization.
//!
//! Players treat an ffmpeg playlist written without a playlist type as a
//! live stream and seek to the live edge. Normalization rewrites it into a
//! static VOD playlist:
//!
//! - every `#EXT-X-START` from the input is dropped
//! - `#EXT-X-PLAYLIST-TYPE:VOD` and `#EXT-X-MEDIA-SEQUENCE:0` are forced
//! - segments are sorted by the index in their file name; segments without
//!   one keep their relative order after the indexed ones
//! - exactly one `#EXT-X-ENDLIST` closes the playlist
//! - `#EXT-X-START:TIME-OFFSET=0` follows the header block
//! - `#EXT-X-TARGETDURATION` is raised to cover the longest segment
//!
//! The transform is idempotent.

use vf_core::Result;

use super::generator::generate_media_playlist;
use super::parser::{parse_media_playlist, segment_index};
use super::types::{MediaPlaylist, Segment};

/// Whether the manifest text carries a terminating `#EXT-X-ENDLIST`.
pub fn is_complete(text: &str) -> bool {
    text.lines().any(|l| l.trim() == "#EXT-X-ENDLIST")
}

pub(crate) fn sort_segments(segments: &mut [Segment]) {
    // Stable: unindexed entries all share one key and keep their order.
    segments.sort_by_key(|s| match segment_index(&s.uri) {
        Some(i) => (0u8, i),
        None => (1u8, 0),
    });
}

pub(crate) fn normalize_playlist(mut playlist: MediaPlaylist) -> MediaPlaylist {
    sort_segments(&mut playlist.segments);

    let longest = playlist.longest_segment().ceil() as u32;
    playlist.target_duration = playlist.target_duration.max(longest).max(1);
    playlist.media_sequence = 0;
    playlist.vod = true;
    playlist.start_offset = Some(0.0);
    playlist.ended = true;
    playlist
}

/// Normalize manifest text into a static VOD playlist.
pub fn normalize(text: &str) -> Result<String> {
    let playlist = parse_media_playlist(text)?;
    Ok(generate_media_playlist(&normalize_playlist(playlist)))
}
