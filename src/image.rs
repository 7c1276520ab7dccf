//! Container image reference parsing and normalization

use serde::Serialize;
use thiserror::Error;

/// Canonical host of the default public registry.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Legacy alias host for the default public registry.
pub const DEFAULT_REGISTRY_ALIAS: &str = "index.docker.io";

/// Namespace Docker Hub uses for official images.
pub const OFFICIAL_NAMESPACE: &str = "library";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty image reference")]
    Empty,

    #[error("invalid image reference: {0}")]
    Invalid(String),
}

/// A parsed, normalized image reference.
///
/// Grammar: `[registry/][namespace/]repository[:tag][@digest]`. A leading
/// segment counts as a registry only when it contains a dot or a port;
/// otherwise it is a namespace. Defaults are filled at parse time:
/// registry falls back to [`DEFAULT_REGISTRY`], the tag to `latest` (unless a
/// digest pins the image), and bare repositories on the default registry are
/// rewritten into the `library/` namespace.
///
/// Immutable value type; identity is value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: Option<String>,
    /// Full repository path including the namespace (e.g. `library/nginx`).
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ParseError::Invalid(raw.to_string()));
        }

        // Split off the digest first: everything after '@'.
        let (rest, digest) = match raw.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(ParseError::Invalid(raw.to_string())),
            None => (raw, None),
        };

        // A ':' after the last '/' separates the tag; earlier colons belong
        // to a registry port.
        let (path, tag) = match rest.rfind(':') {
            Some(idx) if idx > rest.rfind('/').unwrap_or(0) => {
                let tag = &rest[idx + 1..];
                if tag.is_empty() {
                    return Err(ParseError::Invalid(raw.to_string()));
                }
                (&rest[..idx], Some(tag.to_string()))
            }
            _ => (rest, None),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ParseError::Invalid(raw.to_string()));
        }

        // The first segment is a registry host iff it contains a dot or a
        // port. A plain first segment is a namespace, not a host.
        let (registry, path_segments) = match segments.split_first() {
            Some((first, rest))
                if !rest.is_empty() && (first.contains('.') || first.contains(':')) =>
            {
                ((*first).to_string(), rest.to_vec())
            }
            _ => (DEFAULT_REGISTRY.to_string(), segments),
        };

        if path_segments.is_empty() {
            return Err(ParseError::Invalid(raw.to_string()));
        }

        // Official images live under the `library` namespace on Docker Hub;
        // the rewrite keeps `parse` idempotent over `full_name`.
        let (namespace, repository) = if path_segments.len() > 1 {
            (
                Some(path_segments[..path_segments.len() - 1].join("/")),
                path_segments.join("/"),
            )
        } else if is_default_registry(&registry) {
            (
                Some(OFFICIAL_NAMESPACE.to_string()),
                format!("{OFFICIAL_NAMESPACE}/{}", path_segments[0]),
            )
        } else {
            (None, path_segments[0].to_string())
        };

        // The tag is only defaulted when no digest pins the image.
        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            namespace,
            repository,
            tag,
            digest,
        })
    }

    /// True when the registry is neither the default registry's canonical
    /// host nor its alias.
    pub fn is_private_registry(&self) -> bool {
        !is_default_registry(&self.registry)
    }

    /// Canonical string form; `parse` is idempotent over it.
    pub fn full_name(&self) -> String {
        match (&self.tag, &self.digest) {
            (_, Some(digest)) => format!("{}/{}@{digest}", self.registry, self.repository),
            (Some(tag), None) => format!("{}/{}:{tag}", self.registry, self.repository),
            (None, None) => format!("{}/{}", self.registry, self.repository),
        }
    }

    /// The tag used for update comparison; empty only for digest-pinned refs.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name())
    }
}

fn is_default_registry(registry: &str) -> bool {
    registry == DEFAULT_REGISTRY || registry == DEFAULT_REGISTRY_ALIAS
}
