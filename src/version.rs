//! Platform release version handling.
//!
//! Declared versions are loose: development builds carry a `-SNAPSHOT`
//! suffix and short forms like "2.0" are common. Everything is normalized to
//! strict semver before any comparison.

use semver::Version;

use crate::controller::error::{Error, Result};

const SNAPSHOT_SUFFIX: &str = "-snapshot";

/// Parse a declared platform version into semver.
///
/// A leading `v`, as found on image tags, and `-SNAPSHOT` (any case) are
/// stripped. Missing minor/patch components are padded with zeros.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let unprefixed = trimmed
        .strip_prefix(['v', 'V'])
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(trimmed);
    let base = strip_snapshot(unprefixed);
    if base.is_empty() {
        return Err(Error::Version(format!("empty version string '{}'", raw)));
    }

    // Pre-release and build metadata belong to the patch component
    let core_end = base.find(['-', '+']).unwrap_or(base.len());
    let (core, rest) = base.split_at(core_end);

    let normalized = match core.matches('.').count() {
        0 => format!("{}.0.0{}", core, rest),
        1 => format!("{}.0{}", core, rest),
        _ => base.to_string(),
    };

    Version::parse(&normalized)
        .map_err(|e| Error::Version(format!("invalid version '{}': {}", raw, e)))
}

fn strip_snapshot(version: &str) -> &str {
    let lower = version.to_ascii_lowercase();
    if lower.ends_with(SNAPSHOT_SUFFIX) {
        version
            .get(..version.len() - SNAPSHOT_SUFFIX.len())
            .unwrap_or(version)
    } else {
        version
    }
}

/// Whether the declared version names a pre-1.0 release.
pub fn is_pre_1_0(version: &Version) -> bool {
    version.major < 1
}

/// Whether `declared` is a different release than `recorded`.
///
/// Both are compared after normalization so "2.0" and "2.0.0-SNAPSHOT" are
/// the same release. Unparseable input falls back to string comparison.
pub fn version_changed(declared: &str, recorded: &str) -> bool {
    match (parse_version(declared), parse_version(recorded)) {
        (Ok(a), Ok(b)) => a != b,
        _ => declared.trim() != recorded.trim(),
    }
}

/// Extract the tag of a container image reference.
///
/// Handles registry ports ("host:5000/img:1.1.0") and digests
/// ("img:1.1.0@sha256:..."). Returns `None` for untagged images.
pub fn image_tag(image: &str) -> Option<String> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
}
