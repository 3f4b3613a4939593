//! Version range parsing and floor selection.
//!
//! npm's range grammar is wider than what `semver::VersionReq` accepts, so
//! ranges are lowered before parsing: hyphen ranges, x-ranges, bare versions
//! (exact in npm, caret-like in Rust semver), space-separated AND
//! comparators, and `||` alternatives.

use crate::error::NdError;
use crate::registry::Manifest;
use semver::{Version, VersionReq};

/// A parsed version range predicate.
///
/// Holds one `VersionReq` per `||` alternative; a version matches the range
/// when any alternative accepts it.
#[derive(Debug, Clone)]
pub struct Range {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Range {
    /// Parse an npm-style version range.
    ///
    /// Invalid `||` alternatives are skipped as long as at least one parses.
    ///
    /// # Errors
    /// Returns `RANGE_INVALID` if no alternative parses.
    pub fn parse(raw: &str) -> Result<Self, NdError> {
        let mut alternatives = Vec::new();
        let mut last_err = None;

        for alt in raw.split("||") {
            if alt.trim().is_empty() && raw.contains("||") {
                continue;
            }
            match parse_single(alt) {
                Ok(req) => alternatives.push(req),
                Err(e) => last_err = Some(e),
            }
        }

        if alternatives.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                NdError::range_invalid(raw, "no valid alternatives")
            }));
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// Whether `version` satisfies this range.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// The original range text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Pick the minimum manifest version satisfying `range`.
///
/// Unparseable version strings in the manifest are skipped. Floor selection
/// keeps installs reproducible without a lockfile.
#[must_use]
pub fn min_satisfying(manifest: &Manifest, range: &Range) -> Option<Version> {
    manifest
        .versions
        .keys()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| range.matches(v))
        .min()
}

/// Parse a single (non-OR) range, lowering npm syntax first.
fn parse_single(range: &str) -> Result<VersionReq, NdError> {
    let range = range.trim();

    if range.is_empty() || range == "*" || range == "x" || range == "X" {
        return VersionReq::parse(">=0.0.0").map_err(|e| NdError::range_invalid(range, e));
    }

    // Hyphen ranges: "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = split_hyphen_range(range) {
        let converted = format!(">={start}, <={end}");
        return VersionReq::parse(&converted).map_err(|e| NdError::range_invalid(range, e));
    }

    // X-ranges: "1.x" -> ">=1.0.0, <2.0.0"
    if let Some(converted) = convert_x_range(range) {
        return VersionReq::parse(&converted).map_err(|e| NdError::range_invalid(range, e));
    }

    // Bare versions are exact in npm; Rust semver would treat them as caret.
    if Version::parse(range).is_ok() {
        return VersionReq::parse(&format!("={range}"))
            .map_err(|e| NdError::range_invalid(range, e));
    }

    // Space-separated comparators mean AND: ">= 2.1.2 < 3.0.0"
    let converted = convert_space_separated(range);
    VersionReq::parse(&converted).map_err(|e| NdError::range_invalid(range, e))
}

/// Split a hyphen range on the " - " separator.
fn split_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    Some((start, end))
}

/// Convert an x-range ("1.x", "1.2.X", "1.*") to a comparator pair.
///
/// Returns `None` when the range is not an x-range (e.g. "1.0.0-xy" has an
/// `x` inside a pre-release tag).
fn convert_x_range(range: &str) -> Option<String> {
    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X" | "*"] | [major, "x" | "X" | "*", "x" | "X" | "*"] => {
            let m: u64 = major.parse().ok()?;
            Some(format!(">={m}.0.0, <{}.0.0", m + 1))
        }
        [major, minor, "x" | "X" | "*"] => {
            let m: u64 = major.parse().ok()?;
            let n: u64 = minor.parse().ok()?;
            Some(format!(">={m}.{n}.0, <{m}.{}.0", n + 1))
        }
        _ => None,
    }
}

/// Convert space-separated AND comparators to semver's comma form.
///
/// An operator token with no digits ("<=") attaches to the next token.
fn convert_space_separated(range: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in range.split_whitespace() {
        if token.chars().any(|c| c.is_ascii_digit()) {
            match pending_op.take() {
                Some(op) => parts.push(format!("{op}{token}")),
                None => parts.push(token.to_string()),
            }
        } else {
            pending_op = Some(token);
        }
    }
    if let Some(op) = pending_op {
        parts.push(op.to_string());
    }

    if parts.is_empty() {
        range.to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ManifestDist, ManifestVersion};
    use std::collections::BTreeMap;

    fn make_manifest(versions: &[&str]) -> Manifest {
        let versions = versions
            .iter()
            .map(|v| {
                (
                    (*v).to_string(),
                    ManifestVersion {
                        dependencies: BTreeMap::new(),
                        dist: ManifestDist {
                            tarball: format!("https://example.com/{v}.tgz"),
                            integrity: String::new(),
                        },
                    },
                )
            })
            .collect();
        Manifest {
            name: "test-pkg".to_string(),
            versions,
        }
    }

    fn min(versions: &[&str], range: &str) -> Option<String> {
        let manifest = make_manifest(versions);
        let range = Range::parse(range).unwrap();
        min_satisfying(&manifest, &range).map(|v| v.to_string())
    }

    #[test]
    fn test_floor_caret() {
        assert_eq!(
            min(&["1.0.0", "1.5.0", "2.0.0"], "^1.0.0"),
            Some("1.0.0".to_string())
        );
    }

    #[test]
    fn test_floor_picks_lowest_in_range() {
        assert_eq!(
            min(&["1.0.1", "1.2.0", "1.9.9"], "^1.1.0"),
            Some("1.2.0".to_string())
        );
    }

    #[test]
    fn test_floor_tilde() {
        assert_eq!(
            min(&["1.0.0", "1.0.5", "1.1.0"], "~1.0.1"),
            Some("1.0.5".to_string())
        );
    }

    #[test]
    fn test_exact_version() {
        assert_eq!(
            min(&["1.0.0", "1.5.0", "2.0.0"], "1.5.0"),
            Some("1.5.0".to_string())
        );
    }

    #[test]
    fn test_bare_version_is_exact_not_caret() {
        let range = Range::parse("1.0.0").unwrap();
        assert!(range.matches(&Version::parse("1.0.0").unwrap()));
        assert!(!range.matches(&Version::parse("1.5.0").unwrap()));
    }

    #[test]
    fn test_star_matches_everything() {
        assert_eq!(min(&["0.0.1", "3.0.0"], "*"), Some("0.0.1".to_string()));
        assert_eq!(min(&["0.0.1", "3.0.0"], ""), Some("0.0.1".to_string()));
    }

    #[test]
    fn test_x_range() {
        assert_eq!(
            min(&["0.9.0", "1.0.0", "1.5.0", "2.0.0"], "1.x"),
            Some("1.0.0".to_string())
        );
        assert_eq!(
            min(&["1.2.0", "1.2.9", "1.3.0"], "1.2.x"),
            Some("1.2.0".to_string())
        );
    }

    #[test]
    fn test_x_inside_prerelease_is_not_an_x_range() {
        assert!(convert_x_range("1.0.0-xy").is_none());
    }

    #[test]
    fn test_hyphen_range() {
        assert_eq!(
            min(&["0.5.0", "1.0.0", "1.5.0", "2.0.0", "3.0.0"], "1.0.0 - 2.0.0"),
            Some("1.0.0".to_string())
        );
    }

    #[test]
    fn test_space_separated_comparators() {
        assert_eq!(
            min(&["2.0.0", "2.1.2", "2.5.0", "3.0.0"], ">= 2.1.2 < 3.0.0"),
            Some("2.1.2".to_string())
        );
        assert_eq!(
            min(&["2.0.0", "2.1.2", "2.5.0", "3.0.0"], ">=2.1.2 <3.0.0"),
            Some("2.1.2".to_string())
        );
    }

    #[test]
    fn test_or_range() {
        assert_eq!(
            min(&["1.5.0", "2.5.0"], "^1.0.0 || ^2.0.0"),
            Some("1.5.0".to_string())
        );
        assert_eq!(
            min(&["2.0.0", "2.5.0"], "^1.0.0 || ^2.0.0"),
            Some("2.0.0".to_string())
        );
    }

    #[test]
    fn test_or_range_skips_invalid_alternative() {
        let range = Range::parse("not!a!range || ^2.0.0").unwrap();
        assert!(range.matches(&Version::parse("2.1.0").unwrap()));
    }

    #[test]
    fn test_invalid_range_errors() {
        let err = Range::parse("not!a!range").unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RANGE_INVALID);
    }

    #[test]
    fn test_no_satisfying_version() {
        assert_eq!(min(&["1.0.0", "2.0.0"], "^3.0.0"), None);
    }

    #[test]
    fn test_prerelease_not_matched_by_plain_range() {
        assert_eq!(
            min(&["2.0.0-alpha.1", "2.0.0"], "^2.0.0"),
            Some("2.0.0".to_string())
        );
    }

    #[test]
    fn test_major_only_is_a_range() {
        assert_eq!(
            min(&["1.0.0", "2.0.0", "2.5.0"], "2"),
            Some("2.0.0".to_string())
        );
    }
}
