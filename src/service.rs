//! Service wiring: containers -> checker -> notifications
//!
//! One [`UpdateService::run_check`] pass enumerates running containers,
//! narrows them down through the configured filters, checks the surviving
//! images for updates, and hands a batch notification to the hub. A
//! container whose image reference does not parse is skipped with a warning
//! rather than failing the pass.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::checker::UpdateChecker;
use crate::config::ContainersConfig;
use crate::containers::{ContainerSource, RunningContainer};
use crate::image::ImageReference;
use crate::notify::{ImageUpdate, Notification, NotificationHub};

/// Outcome of one check pass.
#[derive(Debug, Default)]
pub struct CheckSummary {
    pub containers_seen: usize,
    pub images_checked: usize,
    pub updates_found: usize,
    pub failures: usize,
}

pub struct UpdateService {
    containers: Arc<dyn ContainerSource>,
    checker: UpdateChecker,
    hub: NotificationHub,
    filters: ContainersConfig,
    max_concurrency: usize,
}

impl UpdateService {
    pub fn new(
        containers: Arc<dyn ContainerSource>,
        checker: UpdateChecker,
        hub: NotificationHub,
        filters: ContainersConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            containers,
            checker,
            hub,
            filters,
            max_concurrency,
        }
    }

    /// Run one full check pass and notify on any updates found.
    pub async fn run_check(&self) -> anyhow::Result<CheckSummary> {
        let started = std::time::Instant::now();
        let containers = self.containers.running_containers().await?;
        info!(container_count = containers.len(), "retrieved running containers");

        let mut summary = CheckSummary {
            containers_seen: containers.len(),
            ..CheckSummary::default()
        };
        if containers.is_empty() {
            return Ok(summary);
        }

        let (images, names_by_image) = self.select_images(&containers);
        if images.is_empty() {
            info!("no containers match the configured filters");
            return Ok(summary);
        }
        summary.images_checked = images.len();

        let report = match self.checker.check_many(&images, self.max_concurrency).await {
            Ok(report) => report,
            Err(err) => {
                let _ = self
                    .hub
                    .send(&Notification::ErrorReport {
                        source: "image-check".to_string(),
                        message: err.to_string(),
                    })
                    .await;
                return Err(err.into());
            }
        };
        summary.failures = report.failures;

        let mut updates = Vec::new();
        for verdict in &report.verdicts {
            if !verdict.has_update {
                continue;
            }
            let Some(latest_tag) = verdict.latest_tag.clone() else {
                continue;
            };
            let key = (verdict.registry.clone(), verdict.repository.clone());
            let container_name = names_by_image
                .get(&key)
                .and_then(|names| names.first())
                .cloned();
            updates.push(ImageUpdate {
                registry: verdict.registry.clone(),
                repository: verdict.repository.clone(),
                current_tag: verdict.current_tag.clone(),
                latest_tag,
                container_name,
                observed_at: Utc::now(),
            });
        }
        summary.updates_found = updates.len();

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            checked_count = summary.images_checked,
            updates_found = summary.updates_found,
            failures = summary.failures,
            "completed image check"
        );

        if !updates.is_empty() {
            self.hub
                .send(&Notification::UpdateBatch { updates })
                .await?;
        }
        Ok(summary)
    }

    /// Send a health report through the notification hub.
    pub async fn report_health(&self, healthy: bool, detail: &str) -> anyhow::Result<()> {
        self.hub
            .send(&Notification::HealthReport {
                healthy,
                detail: detail.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Apply the container filters and de-duplicate, returning the images to
    /// check plus a `(registry, repository)` -> container names index for
    /// correlating verdicts back.
    fn select_images(
        &self,
        containers: &[RunningContainer],
    ) -> (Vec<ImageReference>, HashMap<(String, String), Vec<String>>) {
        let mut images = Vec::new();
        let mut seen = HashMap::new();
        let mut names_by_image: HashMap<(String, String), Vec<String>> = HashMap::new();

        for container in containers {
            if self.is_excluded(&container.image) {
                debug!(image = %container.image, "image excluded by filter");
                continue;
            }
            if !self.filters.include.is_empty() && !self.is_included(&container.image) {
                debug!(image = %container.image, "image not in include list");
                continue;
            }

            let image = match ImageReference::parse(&container.image) {
                Ok(image) => image,
                Err(err) => {
                    warn!(image = %container.image, error = %err, "skipping unparseable image reference");
                    continue;
                }
            };

            if image.tag_or_default() == "latest" && !self.filters.check_latest {
                debug!(image = %container.image, "skipping latest-pinned image");
                continue;
            }
            if image.is_private_registry() && !self.filters.check_private {
                debug!(image = %container.image, "skipping private registry image");
                continue;
            }

            names_by_image
                .entry((image.registry.clone(), image.repository.clone()))
                .or_default()
                .push(container.name.clone());

            let key = image.full_name();
            if seen.insert(key, ()).is_none() {
                images.push(image);
            }
        }

        (images, names_by_image)
    }

    fn is_excluded(&self, image: &str) -> bool {
        self.filters
            .exclude
            .iter()
            .any(|pattern| wildcard_match(pattern, image))
    }

    fn is_included(&self, image: &str) -> bool {
        self.filters
            .include
            .iter()
            .any(|pattern| wildcard_match(pattern, image))
    }
}

/// Glob-lite matching: `*` matches any run of characters, everything else is
/// literal. Patterns are applied to the image string as the runtime reports
/// it.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let last = segments.len() - 1;
    let mut rest = text;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(stripped) = rest.strip_prefix(segment) else {
                return false;
            };
            rest = stripped;
        } else if i == last {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use rstest::rstest;

    use crate::containers::MockContainerSource;
    use crate::notify::NotificationChannel;
    use crate::registry::client::TagLister;
    use crate::registry::error::RegistryError;
    use crate::registry::rate_limit::RateLimiter;
    use crate::version::filter::VersionFilterConfig;

    struct StaticTags(Vec<String>);

    #[async_trait::async_trait]
    impl TagLister for StaticTags {
        async fn list_tags(&self, _image: &ImageReference) -> Result<Vec<String>, RegistryError> {
            Ok(self.0.clone())
        }
    }

    /// Channel that records everything it is asked to deliver.
    struct CapturingChannel {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait::async_trait]
    impl NotificationChannel for CapturingChannel {
        fn kind(&self) -> &str {
            "capture"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn service_with(
        containers: Vec<RunningContainer>,
        tags: &[&str],
        filters: ContainersConfig,
    ) -> (UpdateService, Arc<Mutex<Vec<Notification>>>) {
        let mut source = MockContainerSource::new();
        source
            .expect_running_containers()
            .returning(move || Ok(containers.clone()));

        let checker = UpdateChecker::new(
            Arc::new(StaticTags(tags.iter().map(|s| s.to_string()).collect())),
            Arc::new(RateLimiter::new(6000, 100)),
            VersionFilterConfig::default(),
            Duration::from_secs(5),
        );

        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut hub = NotificationHub::new();
        hub.register(Box::new(CapturingChannel { sent: sent.clone() }))
            .unwrap();

        let service = UpdateService::new(Arc::new(source), checker, hub, filters, 4);
        (service, sent)
    }

    fn container(name: &str, image: &str) -> RunningContainer {
        RunningContainer {
            name: name.to_string(),
            image: image.to_string(),
        }
    }

    #[rstest]
    #[case("nginx", "nginx", true)]
    #[case("nginx", "redis", false)]
    #[case("*", "anything/at-all:tag", true)]
    #[case("*-test", "app-test", true)]
    #[case("*-test", "app-prod", false)]
    #[case("myorg/*", "myorg/api:1.0", true)]
    #[case("myorg/*", "other/api:1.0", false)]
    #[case("*registry.corp*", "registry.corp:5000/team/app", true)]
    fn wildcard_patterns(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(wildcard_match(pattern, text), expected);
    }

    #[tokio::test]
    async fn run_check_notifies_with_correlated_container_name() {
        let (service, sent) = service_with(
            vec![container("web", "nginx:1.21.0")],
            &["1.21.0", "1.21.1"],
            ContainersConfig::default(),
        );

        let summary = service.run_check().await.unwrap();

        assert_eq!(summary.images_checked, 1);
        assert_eq!(summary.updates_found, 1);

        let sent = sent.lock().unwrap();
        match sent.as_slice() {
            [Notification::UpdateBatch { updates }] => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].repository, "library/nginx");
                assert_eq!(updates[0].latest_tag, "1.21.1");
                assert_eq!(updates[0].container_name.as_deref(), Some("web"));
            }
            other => panic!("expected one update batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn up_to_date_images_produce_no_notification() {
        let (service, sent) = service_with(
            vec![container("web", "nginx:1.21.1")],
            &["1.21.0", "1.21.1"],
            ContainersConfig::default(),
        );

        let summary = service.run_check().await.unwrap();

        assert_eq!(summary.updates_found, 0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_pinned_images_are_skipped_by_default() {
        let (service, _) = service_with(
            vec![container("web", "nginx")],
            &["1.0.0", "2.0.0"],
            ContainersConfig::default(),
        );

        let summary = service.run_check().await.unwrap();
        assert_eq!(summary.containers_seen, 1);
        assert_eq!(summary.images_checked, 0);
    }

    #[tokio::test]
    async fn exclude_patterns_win_over_include() {
        let filters = ContainersConfig {
            include: vec!["*".to_string()],
            exclude: vec!["*nginx*".to_string()],
            ..ContainersConfig::default()
        };
        let (service, _) = service_with(
            vec![
                container("web", "nginx:1.21.0"),
                container("cache", "redis:7.0.0"),
            ],
            &["1.21.0", "7.0.0"],
            filters,
        );

        let summary = service.run_check().await.unwrap();
        assert_eq!(summary.images_checked, 1);
    }

    #[tokio::test]
    async fn unparseable_image_is_skipped_not_fatal() {
        let (service, _) = service_with(
            vec![
                container("broken", "nginx:"),
                container("web", "nginx:1.21.0"),
            ],
            &["1.21.0", "1.21.1"],
            ContainersConfig::default(),
        );

        let summary = service.run_check().await.unwrap();
        assert_eq!(summary.containers_seen, 2);
        assert_eq!(summary.images_checked, 1);
    }

    #[tokio::test]
    async fn duplicate_images_are_checked_once() {
        let (service, sent) = service_with(
            vec![
                container("web-1", "nginx:1.21.0"),
                container("web-2", "nginx:1.21.0"),
            ],
            &["1.21.0", "1.21.1"],
            ContainersConfig::default(),
        );

        let summary = service.run_check().await.unwrap();
        assert_eq!(summary.images_checked, 1);

        let sent = sent.lock().unwrap();
        match sent.as_slice() {
            [Notification::UpdateBatch { updates }] => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].container_name.as_deref(), Some("web-1"));
            }
            other => panic!("expected one update batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_report_goes_through_the_hub() {
        let (service, sent) =
            service_with(Vec::new(), &[], ContainersConfig::default());

        service.report_health(true, "all tasks ok").await.unwrap();

        let sent = sent.lock().unwrap();
        assert!(matches!(
            sent.as_slice(),
            [Notification::HealthReport { healthy: true, .. }]
        ));
    }
}
