//! Lenient media playlist parser.
//!
//! Encoders that were interrupted leave truncated playlists behind, so the
//! parser accepts anything after a valid `#EXTM3U` header: a trailing
//! `#EXTINF` without a URI is dropped and a URI with no preceding `#EXTINF`
//! is skipped. Playlist-wide tags it does not interpret are kept in the
//! header; any other tag travels with the segment that follows it.

use std::sync::LazyLock;

use regex::Regex;
use vf_core::{Error, Result};

use super::types::{MediaPlaylist, Segment};

/// Playlist-wide tags kept verbatim in [`MediaPlaylist::header_tags`].
const HEADER_TAGS: &[&str] = &[
    "#EXT-X-INDEPENDENT-SEGMENTS",
    "#EXT-X-DISCONTINUITY-SEQUENCE",
    "#EXT-X-ALLOW-CACHE",
    "#EXT-X-I-FRAMES-ONLY",
    "#EXT-X-SERVER-CONTROL",
    "#EXT-X-PART-INF",
    "#EXT-X-DEFINE",
];

fn is_header_tag(line: &str) -> bool {
    let name = line.split_once(':').map_or(line, |(name, _)| name);
    HEADER_TAGS.contains(&name)
}

static SEGMENT_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.[A-Za-z0-9]+$").expect("valid segment index regex"));

/// Numeric index embedded at the end of a segment file name
/// (`segment_007.ts` -> 7). Directory components and query strings are
/// ignored.
pub fn segment_index(uri: &str) -> Option<u64> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.rsplit('/').next().unwrap_or(path);
    SEGMENT_INDEX
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn tag_value<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag).and_then(|rest| rest.strip_prefix(':'))
}

fn parse_extinf(value: &str) -> (f64, Option<String>) {
    let (duration, title) = match value.split_once(',') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (value, None),
    };
    let duration = duration.trim().parse().unwrap_or(0.0);
    let title = title.filter(|t| !t.is_empty()).map(str::to_string);
    (duration, title)
}

fn parse_start_offset(value: &str) -> Option<f64> {
    value
        .split(',')
        .filter_map(|attr| attr.split_once('='))
        .find(|(k, _)| k.trim() == "TIME-OFFSET")
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Parse manifest text into a [`MediaPlaylist`].
///
/// Fails only when the text does not start with `#EXTM3U`.
pub fn parse_media_playlist(text: &str) -> Result<MediaPlaylist> {
    let mut lines = text
        .trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    match lines.next() {
        Some("#EXTM3U") => {}
        _ => return Err(Error::Validation("manifest does not start with #EXTM3U".into())),
    }

    let mut playlist = MediaPlaylist {
        version: None,
        ..MediaPlaylist::default()
    };
    let mut pending_inf: Option<(f64, Option<String>)> = None;
    let mut pending_tags: Vec<String> = Vec::new();

    for line in lines {
        if let Some(v) = tag_value(line, "#EXTINF") {
            pending_inf = Some(parse_extinf(v));
        } else if let Some(v) = tag_value(line, "#EXT-X-VERSION") {
            playlist.version = v.trim().parse().ok();
        } else if let Some(v) = tag_value(line, "#EXT-X-TARGETDURATION") {
            playlist.target_duration = v.trim().parse::<f64>().map_or(0, |d| d.ceil() as u32);
        } else if let Some(v) = tag_value(line, "#EXT-X-MEDIA-SEQUENCE") {
            playlist.media_sequence = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = tag_value(line, "#EXT-X-PLAYLIST-TYPE") {
            playlist.vod = v.trim().eq_ignore_ascii_case("VOD");
        } else if let Some(v) = tag_value(line, "#EXT-X-START") {
            playlist.start_offset = parse_start_offset(v);
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if is_header_tag(line) {
            playlist.header_tags.push(line.to_string());
        } else if line.starts_with("#EXT") {
            pending_tags.push(line.to_string());
        } else if line.starts_with('#') {
            // plain comment
        } else if let Some((duration, title)) = pending_inf.take() {
            playlist.segments.push(Segment {
                duration,
                uri: line.to_string(),
                title,
                tags: std::mem::take(&mut pending_tags),
            });
        } else {
            tracing::debug!(uri = line, "Skipping segment URI without #EXTINF");
            pending_tags.clear();
        }
    }

    Ok(playlist)
}
