//! Tool version compatibility.
//!
//! Only the leading numeric (major) component is compared. Pre-release and
//! build suffixes (`-rc.1`, `+sha.abc`) are stripped first. Anything that
//! does not start with a plain integer is unparsable, and unparsable
//! versions are never compatible with anything.

/// Parse the major component of a dotted version string.
pub fn major_version(version: &str) -> Option<u64> {
    let core = version.trim().split(['-', '+']).next()?;
    let major = core.split('.').next()?;
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    major.parse().ok()
}

/// Whether `incoming` may replace `existing` without a breaking change.
pub fn is_compatible(existing: &str, incoming: &str) -> bool {
    matches!(
        (major_version(existing), major_version(incoming)),
        (Some(a), Some(b)) if a == b
    )
}
