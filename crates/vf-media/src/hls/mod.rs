//! HLS media playlist handling.
//!
//! The encoder writes a single media playlist (`output.m3u8`) next to its
//! `segment_NNN.ts` files. This module parses that playlist, rewrites it
//! into a static VOD playlist, rebuilds it from the segment files when the
//! encoder was cut off, and decides whether it is safe to stream.

mod generator;
mod normalize;
mod parser;
mod readiness;
mod repair;
mod types;

pub use generator::generate_media_playlist;
pub use normalize::{is_complete, normalize};
pub use parser::{parse_media_playlist, segment_index};
pub use readiness::{is_ready, readiness, NotReady};
pub use repair::{ensure_playable, normalize_file, repair_dir, Repaired};
pub use types::{MediaPlaylist, Segment};

/// File name of the manifest inside every artifact directory.
pub const MANIFEST_NAME: &str = "output.m3u8";

/// `printf`-style segment pattern handed to the encoder.
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";
