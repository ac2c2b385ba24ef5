//! Deterministic artifact locations.
//!
//! Local artifacts live at `<root>/hls/<category>/<year>/<month>/<scoped id>/`
//! and remote objects mirror the same relative path under the configured key
//! prefix.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};

/// Make a category code safe to use as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "uncategorized".to_string()
    } else {
        cleaned
    }
}

/// `<category>/<year>/<month>/<scoped id>` relative to the HLS root.
pub fn artifact_rel_dir(category: &str, created: DateTime<Utc>, scoped_id: &str) -> PathBuf {
    let mut p = PathBuf::from(sanitize_component(category));
    p.push(format!("{:04}", created.year()));
    p.push(format!("{:02}", created.month()));
    p.push(scoped_id);
    p
}

/// Remote key prefix under which a job's files are uploaded.
pub fn remote_prefix(
    key_prefix: &str,
    category: &str,
    created: DateTime<Utc>,
    scoped_id: &str,
) -> String {
    let mut parts = Vec::with_capacity(5);
    let key_prefix = key_prefix.trim_matches('/');
    if !key_prefix.is_empty() {
        parts.push(key_prefix.to_string());
    }
    parts.push(sanitize_component(category));
    parts.push(format!("{:04}", created.year()));
    parts.push(format!("{:02}", created.month()));
    parts.push(scoped_id.to_string());
    parts.join("/")
}

/// Join a remote prefix and a relative file name.
pub fn object_key(prefix: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), relative)
    }
}

/// The directory part of an object key (`a/b/output.m3u8` -> `a/b`).
pub fn key_dir(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Reject keys that could escape the store root.
pub(crate) fn check_key(key: &str) -> vf_core::Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|c| c.is_empty() || c == "." || c == "..")
    {
        return Err(vf_core::Error::storage(key, "invalid object key", false));
    }
    Ok(())
}
