//! vf-media: HLS manifest handling.
//!
//! Everything here is pure post-processing of manifest text plus a few
//! file-level helpers; nothing in this crate talks to ffmpeg or the
//! database.
//!
//! # Modules
//!
//! - [`hls`] - manifest model, parser, generator, normalizer, repair and
//!   readiness check

pub mod hls;

// Re-export commonly used items at the crate root.
pub use hls::{
    generate_media_playlist, is_complete, is_ready, normalize, normalize_file, parse_media_playlist,
    readiness, repair_dir, segment_index, ensure_playable, MediaPlaylist, NotReady, Repaired,
    Segment, MANIFEST_NAME,
};
