//! Concurrent update checking across many images
//!
//! One `UpdateChecker` serves a whole batch: every check shares the same
//! rate limiter, and batch fan-out is admitted through a counting semaphore
//! so no more than `max_concurrency` checks are in flight at once. A failed
//! check never aborts the others; the batch fails only when every check does.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::image::ImageReference;
use crate::registry::client::TagLister;
use crate::registry::error::RegistryError;
use crate::registry::rate_limit::RateLimiter;
use crate::version::filter::{VersionFilterConfig, resolve_latest};
use crate::version::semver::{VersionOrdering, compare_tags};

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("check cancelled: {0}")]
    Cancelled(String),

    #[error("all {failed} image checks failed")]
    AllFailed { failed: usize },
}

/// The outcome of checking one image against its registry. Created fresh per
/// check; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUpdateVerdict {
    pub registry: String,
    pub repository: String,
    pub current_tag: String,
    pub latest_tag: Option<String>,
    pub available_tags: Vec<String>,
    pub has_update: bool,
    pub checked_at: DateTime<Utc>,
}

/// Result of a batch check: the verdicts that succeeded plus a count of
/// failed checks. Failures are reported per batch, not per item.
#[derive(Debug)]
pub struct BatchReport {
    pub verdicts: Vec<ImageUpdateVerdict>,
    pub failures: usize,
}

pub struct UpdateChecker {
    tags: Arc<dyn TagLister>,
    limiter: Arc<RateLimiter>,
    filters: VersionFilterConfig,
    check_timeout: Duration,
}

impl UpdateChecker {
    pub fn new(
        tags: Arc<dyn TagLister>,
        limiter: Arc<RateLimiter>,
        filters: VersionFilterConfig,
        check_timeout: Duration,
    ) -> Self {
        Self {
            tags,
            limiter,
            filters,
            check_timeout,
        }
    }

    /// Check a single image for an available update.
    ///
    /// An empty tag list is not an error; it yields a no-update verdict. The
    /// whole call (rate-limiter wait included) runs under the per-check
    /// timeout, and expiry surfaces as [`CheckError::Cancelled`], never as a
    /// registry failure.
    pub async fn check_one(
        &self,
        image: &ImageReference,
    ) -> Result<ImageUpdateVerdict, CheckError> {
        tokio::time::timeout(self.check_timeout, self.check_inner(image))
            .await
            .map_err(|_| {
                CheckError::Cancelled(format!(
                    "check of {}/{} exceeded {:?}",
                    image.registry, image.repository, self.check_timeout
                ))
            })?
    }

    async fn check_inner(&self, image: &ImageReference) -> Result<ImageUpdateVerdict, CheckError> {
        self.limiter.acquire().await;

        let current_tag = image.tag_or_default().to_string();
        let available_tags = self.tags.list_tags(image).await?;

        let mut verdict = ImageUpdateVerdict {
            registry: image.registry.clone(),
            repository: image.repository.clone(),
            current_tag: current_tag.clone(),
            latest_tag: None,
            available_tags,
            has_update: false,
            checked_at: Utc::now(),
        };

        if verdict.available_tags.is_empty() {
            warn!(
                registry = %image.registry,
                repository = %image.repository,
                "no tags found for image"
            );
            return Ok(verdict);
        }

        match resolve_latest(&verdict.available_tags, &current_tag, &self.filters) {
            Ok(latest) => {
                verdict.has_update =
                    compare_tags(&current_tag, &latest) == VersionOrdering::Older;
                verdict.latest_tag = Some(latest);
            }
            Err(err) => {
                // Selection can only fail on an empty list, which was handled
                // above; keep the no-update verdict if that ever changes.
                warn!(
                    registry = %image.registry,
                    repository = %image.repository,
                    error = %err,
                    "failed to determine latest tag"
                );
            }
        }

        debug!(
            registry = %verdict.registry,
            repository = %verdict.repository,
            current_tag = %verdict.current_tag,
            latest_tag = verdict.latest_tag.as_deref().unwrap_or(""),
            has_update = verdict.has_update,
            "completed image update check"
        );
        Ok(verdict)
    }

    /// Check a batch of images with at most `max_concurrency` in flight.
    ///
    /// Every outcome is collected before returning; order of the output is
    /// unspecified, so callers correlate by `(registry, repository)`. Failed
    /// checks are logged and counted, and the batch as a whole errors only
    /// when no check succeeded.
    pub async fn check_many(
        &self,
        images: &[ImageReference],
        max_concurrency: usize,
    ) -> Result<BatchReport, CheckError> {
        if images.is_empty() {
            return Ok(BatchReport {
                verdicts: Vec::new(),
                failures: 0,
            });
        }

        let gate = Arc::new(Semaphore::new(max_concurrency.max(1)));

        let checks = images.iter().map(|image| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.expect("semaphore never closed");
                (image, self.check_one(image).await)
            }
        });

        let mut verdicts = Vec::with_capacity(images.len());
        let mut failures = 0usize;

        for (image, outcome) in join_all(checks).await {
            match outcome {
                Ok(verdict) => verdicts.push(verdict),
                Err(err) => {
                    warn!(
                        registry = %image.registry,
                        repository = %image.repository,
                        error = %err,
                        "image update check failed"
                    );
                    failures += 1;
                }
            }
        }

        if verdicts.is_empty() && failures > 0 {
            return Err(CheckError::AllFailed { failed: failures });
        }

        Ok(BatchReport { verdicts, failures })
    }
}
