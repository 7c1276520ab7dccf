//! End-to-end update checks against a mock registry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockito::{Server, ServerGuard};

use tagwatch::checker::UpdateChecker;
use tagwatch::config::ContainersConfig;
use tagwatch::containers::StaticSource;
use tagwatch::image::ImageReference;
use tagwatch::notify::{Notification, NotificationChannel, NotificationHub};
use tagwatch::registry::client::RegistryClient;
use tagwatch::registry::rate_limit::RateLimiter;
use tagwatch::service::UpdateService;
use tagwatch::version::filter::VersionFilterConfig;

async fn mock_hub_repo(server: &mut ServerGuard, repo: &str, tags_body: &str, status: usize) {
    server
        .mock(
            "GET",
            format!("/token?service=registry.docker.io&scope=repository:{repo}:pull").as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token":"test-token"}"#)
        .create_async()
        .await;
    server
        .mock("GET", format!("/v2/{repo}/tags/list").as_str())
        .match_header("authorization", "Bearer test-token")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(tags_body)
        .create_async()
        .await;
}

fn checker_for(server: &ServerGuard) -> UpdateChecker {
    let client = RegistryClient::with_endpoints(
        Duration::from_secs(5),
        &server.url(),
        &server.url(),
    );
    UpdateChecker::new(
        Arc::new(client),
        Arc::new(RateLimiter::new(6000, 100)),
        VersionFilterConfig::default(),
        Duration::from_secs(10),
    )
}

#[tokio::test]
async fn batch_check_against_registry_reports_updates_and_failures() {
    let mut server = Server::new_async().await;
    mock_hub_repo(
        &mut server,
        "library/nginx",
        r#"{"name":"library/nginx","tags":["1.25.0","1.25.1","1.26.0-rc1","latest"]}"#,
        200,
    )
    .await;
    mock_hub_repo(
        &mut server,
        "library/ghost",
        r#"{"errors":[{"code":"NAME_UNKNOWN"}]}"#,
        404,
    )
    .await;

    let checker = checker_for(&server);
    let images = vec![
        ImageReference::parse("nginx:1.25.0").unwrap(),
        ImageReference::parse("ghost:1.0.0").unwrap(),
    ];

    let report = checker.check_many(&images, 4).await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(report.verdicts.len(), 1);
    let verdict = &report.verdicts[0];
    assert_eq!(verdict.repository, "library/nginx");
    assert!(verdict.has_update);
    // The release-candidate tag must not be selected.
    assert_eq!(verdict.latest_tag.as_deref(), Some("1.25.1"));
}

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

#[tokio::test]
async fn service_pass_notifies_about_registry_updates() {
    let mut server = Server::new_async().await;
    mock_hub_repo(
        &mut server,
        "library/redis",
        r#"{"name":"library/redis","tags":["7.2.0","7.2.1","7.3.0-beta1"]}"#,
        200,
    )
    .await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut hub = NotificationHub::new();
    hub.register(Box::new(CapturingChannel { sent: sent.clone() }))
        .unwrap();

    let service = UpdateService::new(
        Arc::new(StaticSource::from_images(&["redis:7.2.0"])),
        checker_for(&server),
        hub,
        ContainersConfig::default(),
        4,
    );

    let summary = service.run_check().await.unwrap();
    assert_eq!(summary.images_checked, 1);
    assert_eq!(summary.updates_found, 1);

    let sent = sent.lock().unwrap();
    match sent.as_slice() {
        [Notification::UpdateBatch { updates }] => {
            assert_eq!(updates[0].repository, "library/redis");
            assert_eq!(updates[0].current_tag, "7.2.0");
            assert_eq!(updates[0].latest_tag, "7.2.1");
        }
        other => panic!("expected one update batch, got {other:?}"),
    }
}
