//! Candidate tag filtering and latest-version selection

use serde::Deserialize;
use tracing::debug;

use crate::version::error::SelectionError;
use crate::version::semver::{VersionOrdering, compare_tags, is_semver_tag, is_stable_tag};

/// Markers that identify pre-release builds anywhere in a tag.
const PRE_RELEASE_MARKERS: &[&str] = &["rc", "alpha", "beta", "dev", "snapshot", "nightly", "pre"];

/// Markers that identify Windows image variants anywhere in a tag.
const WINDOWS_MARKERS: &[&str] = &["windows", "windowsservercore", "nanoserver", "ltsc", "insider"];

/// Which tags count as eligible update candidates. Pure configuration,
/// immutable after construction.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VersionFilterConfig {
    pub exclude_pre_release: bool,
    pub exclude_windows: bool,
    pub only_stable: bool,
    pub exclude_patterns: Vec<String>,
}

impl Default for VersionFilterConfig {
    fn default() -> Self {
        Self {
            exclude_pre_release: true,
            exclude_windows: true,
            only_stable: true,
            exclude_patterns: Vec::new(),
        }
    }
}

impl VersionFilterConfig {
    fn exclusion_markers(&self) -> Vec<String> {
        let mut markers = Vec::new();
        if self.exclude_pre_release {
            markers.extend(PRE_RELEASE_MARKERS.iter().map(|m| m.to_string()));
        }
        if self.exclude_windows {
            markers.extend(WINDOWS_MARKERS.iter().map(|m| m.to_string()));
        }
        markers.extend(self.exclude_patterns.iter().map(|p| p.to_lowercase()));
        markers
    }
}

/// Keep the tags that are semantic-version shaped and pass the configured
/// exclusions. Matching is lower-cased substring matching, not whole-token:
/// a tag containing a marker anywhere is dropped. Output order follows input
/// order but is not part of the contract; use [`find_highest`] to pick a
/// winner.
pub fn filter_candidates(tags: &[String], cfg: &VersionFilterConfig) -> Vec<String> {
    let markers = cfg.exclusion_markers();

    let filtered: Vec<String> = tags
        .iter()
        .filter(|tag| is_semver_tag(tag))
        .filter(|tag| {
            let lowered = tag.to_lowercase();
            if let Some(marker) = markers.iter().find(|m| lowered.contains(m.as_str())) {
                debug!(tag = %tag, marker = %marker, "excluding tag on filter marker");
                return false;
            }
            if cfg.only_stable && !is_stable_tag(tag) {
                debug!(tag = %tag, "excluding non-stable tag");
                return false;
            }
            true
        })
        .cloned()
        .collect();

    debug!(
        original = tags.len(),
        filtered = filtered.len(),
        "applied version filtering"
    );
    filtered
}

/// Linear scan for the highest tag per [`compare_tags`]. Ties (and
/// incomparable pairs) keep the earliest-seen candidate. Returns `None` only
/// for an empty input.
pub fn find_highest(tags: &[String]) -> Option<&str> {
    let (first, rest) = tags.split_first()?;
    let mut highest = first.as_str();
    for tag in rest {
        if compare_tags(highest, tag) == VersionOrdering::Older {
            highest = tag;
        }
    }
    Some(highest)
}

/// Select the latest eligible tag for a currently running `current_tag`.
///
/// A container already tracking `latest` is compared against the unfiltered
/// newest build, so filtering is bypassed entirely. Otherwise candidates are
/// filtered first; if that empties the list, a literal `latest` tag is
/// preferred and the first unfiltered tag is the final fallback. That
/// fallback order is a compatibility policy choice, not a derived
/// requirement. Fails only when `available_tags` is empty.
pub fn resolve_latest(
    available_tags: &[String],
    current_tag: &str,
    cfg: &VersionFilterConfig,
) -> Result<String, SelectionError> {
    if available_tags.is_empty() {
        return Err(SelectionError::NoTags);
    }

    if current_tag == "latest" {
        return Ok(find_highest(available_tags)
            .expect("non-empty tag list")
            .to_string());
    }

    let candidates = filter_candidates(available_tags, cfg);
    if candidates.is_empty() {
        let fallback = available_tags
            .iter()
            .find(|t| t.as_str() == "latest")
            .unwrap_or(&available_tags[0]);
        return Ok(fallback.clone());
    }

    Ok(find_highest(&candidates)
        .expect("non-empty candidate list")
        .to_string())
}
