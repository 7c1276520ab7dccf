//! Semantic-version-shaped tag parsing and ordering
//!
//! Registry tags are free-form strings. Tags matching
//! `v?MAJOR.MINOR.PATCH(-PRERELEASE)?(+BUILD)?` carry numeric meaning and are
//! ordered numerically; everything else falls back to lexicographic string
//! ordering, a deliberate approximation for tags outside the grammar.

use std::sync::LazyLock;

use regex::Regex;

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([a-zA-Z0-9\-\.]+))?(?:\+([a-zA-Z0-9\-\.]+))?$")
        .expect("semver pattern is valid")
});

static STABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:\+([a-zA-Z0-9\-\.]+))?$").expect("stable pattern is valid")
});

/// Outcome of comparing two tags, from the perspective of the first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Equal,
    Older,
    Newer,
    /// No ordering information, e.g. the literal `latest` tag.
    Incomparable,
}

/// A tag parsed as a semantic version. Build metadata is carried but never
/// participates in ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
    pub build_metadata: Option<String>,
}

impl SemanticVersion {
    /// Parse a tag into a semantic version. A non-matching tag is not an
    /// error; it simply is not a semantic version.
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = SEMVER_RE.captures(tag)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            pre_release: caps.get(4).map(|m| m.as_str().to_string()),
            build_metadata: caps.get(5).map(|m| m.as_str().to_string()),
        })
    }
}

/// True when the tag matches the semantic-version grammar.
pub fn is_semver_tag(tag: &str) -> bool {
    SEMVER_RE.is_match(tag)
}

/// True when the tag (leading `v` stripped) is a stable release:
/// `MAJOR.MINOR.PATCH` with optional build metadata and no pre-release.
pub fn is_stable_tag(tag: &str) -> bool {
    STABLE_RE.is_match(tag.strip_prefix('v').unwrap_or(tag))
}

/// Compare two tags.
///
/// Equal strings are `Equal`. The literal `latest` carries no ordering
/// information, so either side being `latest` yields `Incomparable`. Two
/// semantic versions compare numerically on major/minor/patch; at equal
/// triples a release outranks a pre-release, and two pre-releases compare
/// lexicographically. If either side is not a semantic version, both compare
/// as plain strings.
pub fn compare_tags(a: &str, b: &str) -> VersionOrdering {
    if a == b {
        return VersionOrdering::Equal;
    }
    if a == "latest" || b == "latest" {
        return VersionOrdering::Incomparable;
    }

    let (Some(va), Some(vb)) = (SemanticVersion::parse(a), SemanticVersion::parse(b)) else {
        return match a.cmp(b) {
            std::cmp::Ordering::Less => VersionOrdering::Older,
            std::cmp::Ordering::Greater => VersionOrdering::Newer,
            std::cmp::Ordering::Equal => VersionOrdering::Equal,
        };
    };

    match (va.major, va.minor, va.patch).cmp(&(vb.major, vb.minor, vb.patch)) {
        std::cmp::Ordering::Less => return VersionOrdering::Older,
        std::cmp::Ordering::Greater => return VersionOrdering::Newer,
        std::cmp::Ordering::Equal => {}
    }

    match (&va.pre_release, &vb.pre_release) {
        (None, Some(_)) => VersionOrdering::Newer,
        (Some(_), None) => VersionOrdering::Older,
        (Some(pa), Some(pb)) => match pa.cmp(pb) {
            std::cmp::Ordering::Less => VersionOrdering::Older,
            std::cmp::Ordering::Greater => VersionOrdering::Newer,
            std::cmp::Ordering::Equal => VersionOrdering::Equal,
        },
        (None, None) => VersionOrdering::Equal,
    }
}
