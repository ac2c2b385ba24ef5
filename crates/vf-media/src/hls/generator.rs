//! HLS playlist generation.

use super::types::MediaPlaylist;
use std::fmt::Write;

/// Generate an HLS media playlist (M3U8) from a [`MediaPlaylist`].
///
/// Output order:
/// - `#EXTM3U` header, then `#EXT-X-VERSION` when set
/// - `#EXT-X-TARGETDURATION` and `#EXT-X-MEDIA-SEQUENCE`
/// - `#EXT-X-PLAYLIST-TYPE:VOD` for VOD playlists
/// - uninterpreted header tags, in their original order
/// - `#EXT-X-START` when a start offset is set
/// - segment tags, `#EXTINF` and URI for each segment
/// - `#EXT-X-ENDLIST` for ended playlists
pub fn generate_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut out = String::new();

    writeln!(out, "#EXTM3U").unwrap();
    if let Some(version) = playlist.version {
        writeln!(out, "#EXT-X-VERSION:{version}").unwrap();
    }
    writeln!(out, "#EXT-X-TARGETDURATION:{}", playlist.target_duration).unwrap();
    writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", playlist.media_sequence).unwrap();
    if playlist.vod {
        writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap();
    }
    for tag in &playlist.header_tags {
        writeln!(out, "{tag}").unwrap();
    }
    if let Some(offset) = playlist.start_offset {
        writeln!(out, "#EXT-X-START:TIME-OFFSET={offset}").unwrap();
    }

    for segment in &playlist.segments {
        for tag in &segment.tags {
            writeln!(out, "{tag}").unwrap();
        }
        match segment.title {
            Some(ref title) => writeln!(out, "#EXTINF:{:.6},{}", segment.duration, title).unwrap(),
            None => writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap(),
        }
        writeln!(out, "{}", segment.uri).unwrap();
    }

    if playlist.ended {
        writeln!(out, "#EXT-X-ENDLIST").unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::types::Segment;

    #[test]
    fn test_generate_vod_playlist_format_exact() {
        let playlist = MediaPlaylist {
            version: Some(3),
            target_duration: 10,
            media_sequence: 0,
            vod: true,
            start_offset: Some(0.0),
            header_tags: vec![],
            segments: vec![Segment::new(10.0, "segment_000.ts"), Segment::new(4.2, "segment_001.ts")],
            ended: true,
        };

        let expected = "\
#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PLAYLIST-TYPE:VOD
#EXT-X-START:TIME-OFFSET=0
#EXTINF:10.000000,
segment_000.ts
#EXTINF:4.200000,
segment_001.ts
#EXT-X-ENDLIST
";
        assert_eq!(generate_media_playlist(&playlist), expected);
    }

    #[test]
    fn test_generate_open_playlist_no_endlist() {
        let playlist = MediaPlaylist {
            target_duration: 4,
            media_sequence: 100,
            segments: vec![Segment::new(4.0, "segment_100.ts")],
            ..MediaPlaylist::default()
        };

        let m3u8 = generate_media_playlist(&playlist);

        assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:100"));
        assert!(!m3u8.contains("#EXT-X-PLAYLIST-TYPE"));
        assert!(!m3u8.contains("#EXT-X-START"));
        assert!(!m3u8.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_generate_titles_and_segment_tags() {
        let mut seg = Segment::new(9.5, "segment_000.ts");
        seg.title = Some("Scene 1".into());
        seg.tags = vec!["#EXT-X-DISCONTINUITY".into()];
        let playlist = MediaPlaylist {
            target_duration: 10,
            segments: vec![seg],
            ended: true,
            ..MediaPlaylist::default()
        };

        let m3u8 = generate_media_playlist(&playlist);
        assert!(m3u8.contains("#EXT-X-DISCONTINUITY\n#EXTINF:9.500000,Scene 1\nsegment_000.ts\n"));
    }
}
