//! Manifest repair and in-place file helpers.
//!
//! An encoder killed at its wall-clock ceiling (or a crashed worker) can
//! leave a manifest without its terminator, or none at all, while the
//! segment files are intact. Repair rebuilds the manifest from the
//! `segment_NNN.ts` files in the directory.

use std::collections::HashMap;
use std::path::Path;

use vf_core::{Error, Result};

use super::generator::generate_media_playlist;
use super::normalize::{is_complete, normalize, normalize_playlist};
use super::parser::{parse_media_playlist, segment_index};
use super::types::{MediaPlaylist, Segment};

/// What [`ensure_playable`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repaired {
    /// The manifest was complete and only needed normalizing.
    Normalized,
    /// The manifest was rebuilt from the segment files on disk.
    Rebuilt { segments: usize },
}

fn segment_file_index(name: &str) -> Option<u64> {
    if name.starts_with("segment_") && name.ends_with(".ts") {
        segment_index(name)
    } else {
        None
    }
}

/// Rebuild the manifest text for `dir` from its segment files.
///
/// Durations come from the existing manifest (if any) where it lists the
/// segment, else `default_duration`. Fails when `dir` holds no segments.
pub fn repair_dir(dir: &Path, manifest_name: &str, default_duration: f64) -> Result<String> {
    let existing = std::fs::read_to_string(dir.join(manifest_name))
        .ok()
        .and_then(|text| parse_media_playlist(&text).ok());

    let known: HashMap<String, f64> = existing
        .as_ref()
        .map(|pl| {
            pl.segments
                .iter()
                .map(|s| (s.uri.clone(), s.duration))
                .collect()
        })
        .unwrap_or_default();

    let mut files: Vec<(u64, String)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(idx) = segment_file_index(&name) {
            files.push((idx, name));
        }
    }

    if files.is_empty() {
        return Err(Error::Validation(format!(
            "no segments to rebuild manifest from in {}",
            dir.display()
        )));
    }
    files.sort();

    let segments = files
        .into_iter()
        .map(|(_, name)| {
            let duration = known.get(&name).copied().unwrap_or(default_duration);
            Segment::new(duration, name)
        })
        .collect();

    let base = existing.unwrap_or_default();
    let playlist = MediaPlaylist {
        version: base.version.or(Some(3)),
        target_duration: base.target_duration.max(default_duration.ceil() as u32),
        header_tags: base.header_tags,
        segments,
        ..MediaPlaylist::default()
    };

    Ok(generate_media_playlist(&normalize_playlist(playlist)))
}

/// Write `contents` to `path` via a sibling temp file and rename, so
/// readers never observe a half-written manifest.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Normalize the manifest at `path` in place.
pub fn normalize_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let normalized = normalize(&text)?;
    if normalized != text {
        write_atomic(path, &normalized)?;
    }
    Ok(())
}

/// Make the manifest at `path` complete and normalized, rebuilding it from
/// the segment files when it is missing or lacks its terminator.
pub fn ensure_playable(path: &Path, default_duration: f64) -> Result<Repaired> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if let Some(text) = text.as_deref().filter(|t| is_complete(t)) {
        let normalized = normalize(text)?;
        if normalized != text {
            write_atomic(path, &normalized)?;
        }
        return Ok(Repaired::Normalized);
    }

    let dir = path
        .parent()
        .ok_or_else(|| Error::Validation(format!("manifest path has no parent: {}", path.display())))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Validation(format!("invalid manifest path: {}", path.display())))?;

    let rebuilt = repair_dir(dir, name, default_duration)?;
    let segments = rebuilt.lines().filter(|l| l.starts_with("#EXTINF")).count();
    write_atomic(path, &rebuilt)?;
    tracing::warn!(
        manifest = %path.display(),
        segments,
        "Rebuilt incomplete manifest from segment files"
    );
    Ok(Repaired::Rebuilt { segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"ts").unwrap();
    }

    fn uris(text: &str) -> Vec<String> {
        text.lines()
            .filter(|l| l.ends_with(".ts"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn repair_rebuilds_unterminated_manifest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["segment_002.ts", "segment_000.ts", "segment_001.ts"] {
            touch(dir.path(), n);
        }
        std::fs::write(
            dir.path().join("output.m3u8"),
            "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nsegment_002.ts\n#EXTINF:10.0,\nsegment_000.ts\n#EXTINF:6.5,\nsegment_001.ts\n",
        )
        .unwrap();

        let out = repair_dir(dir.path(), "output.m3u8", 10.0).unwrap();
        assert_eq!(uris(&out), ["segment_000.ts", "segment_001.ts", "segment_002.ts"]);
        assert_eq!(out.matches("#EXT-X-ENDLIST").count(), 1);
        assert!(out.trim_end().ends_with("#EXT-X-ENDLIST"));
        // known durations are kept
        assert!(out.contains("#EXTINF:6.500000,\nsegment_001.ts"));
        assert_eq!(normalize(&out).unwrap(), out);
    }

    #[test]
    fn repair_uses_default_duration_for_unlisted_segments() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.ts");
        touch(dir.path(), "segment_001.ts");
        touch(dir.path(), "thumbnail.jpg");

        let out = repair_dir(dir.path(), "output.m3u8", 10.0).unwrap();
        assert_eq!(out.matches("#EXTINF:10.000000,").count(), 2);
        assert!(!out.contains("thumbnail"));
    }

    #[test]
    fn repair_without_segments_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("output.m3u8"), "#EXTM3U\n").unwrap();
        assert!(matches!(
            repair_dir(dir.path(), "output.m3u8", 10.0),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn ensure_playable_normalizes_complete_manifest() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.ts");
        let path = dir.path().join("output.m3u8");
        std::fs::write(&path, "#EXTM3U\n#EXTINF:4.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n").unwrap();

        assert_eq!(ensure_playable(&path, 10.0).unwrap(), Repaired::Normalized);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(!dir.path().join("output.m3u8.tmp").exists());
    }

    #[test]
    fn ready_manifest_with_byte_order_mark_is_playable() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.ts");
        let path = dir.path().join("output.m3u8");
        std::fs::write(
            &path,
            "\u{feff}#EXTM3U\n#EXTINF:4.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n",
        )
        .unwrap();
        assert!(crate::hls::is_ready(&path));

        assert_eq!(ensure_playable(&path, 10.0).unwrap(), Repaired::Normalized);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#EXTM3U"));
        assert_eq!(uris(&text), ["segment_000.ts"]);
    }

    #[test]
    fn ensure_playable_rebuilds_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.ts");
        touch(dir.path(), "segment_001.ts");
        let path = dir.path().join("output.m3u8");

        assert_eq!(
            ensure_playable(&path, 10.0).unwrap(),
            Repaired::Rebuilt { segments: 2 }
        );
        assert!(crate::hls::is_ready(&path));
    }

    #[test]
    fn normalize_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.m3u8");
        std::fs::write(&path, "#EXTM3U\n#EXTINF:4.0,\nsegment_001.ts\n#EXTINF:4.0,\nsegment_000.ts\n").unwrap();
        normalize_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(uris(&text), ["segment_000.ts", "segment_001.ts"]);
        assert!(is_complete(&text));
    }
}
