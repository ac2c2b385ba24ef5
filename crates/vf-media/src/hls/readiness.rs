//! Streaming readiness check.

use std::fmt;
use std::path::Path;

/// Why a manifest is not safe to point a job at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    /// The manifest file does not exist or cannot be read.
    Missing,
    /// The file does not start with `#EXTM3U`.
    NotAManifest,
    /// None of the referenced segments exist next to the manifest.
    NoSegments,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::Missing => f.write_str("manifest missing"),
            NotReady::NotAManifest => f.write_str("file is not an HLS manifest"),
            NotReady::NoSegments => f.write_str("no referenced segment exists"),
        }
    }
}

/// Check that `manifest` exists, starts with `#EXTM3U` and references at
/// least one segment file that exists in the same directory tree.
pub fn readiness(manifest: &Path) -> Result<(), NotReady> {
    let text = std::fs::read_to_string(manifest).map_err(|_| NotReady::Missing)?;
    if !text.trim_start_matches('\u{feff}').starts_with("#EXTM3U") {
        return Err(NotReady::NotAManifest);
    }

    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let found = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|uri| uri.split(['?', '#']).next())
        .any(|uri| base.join(uri).is_file());

    if found {
        Ok(())
    } else {
        Err(NotReady::NoSegments)
    }
}

/// Convenience wrapper over [`readiness`].
pub fn is_ready(manifest: &Path) -> bool {
    readiness(manifest).is_ok()
}
